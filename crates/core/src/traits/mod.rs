pub mod client;
pub mod observer;
pub mod task_store;

pub use client::*;
pub use observer::*;
pub use task_store::*;
