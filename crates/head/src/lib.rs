//! Head端：任务状态机、Worker会话、长轮询和周期巡检

pub mod engine;
pub mod local_client;
pub mod observer;
pub mod sessions;
pub mod sweeper;
pub mod watchers;

pub use engine::{HeadEngine, HeadEngineConfig, SweepOutcome};
pub use local_client::LocalHeadClient;
pub use observer::LoggingObserver;
pub use sessions::SessionRegistry;
pub use sweeper::TaskSweeper;
