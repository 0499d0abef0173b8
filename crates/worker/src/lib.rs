//! Worker端：认领任务、以操作系统进程执行、上报状态

pub mod factory;
pub mod pool;
pub mod process;
pub mod reporter;
pub mod service;

pub use factory::{create_process_factory, ExecProcessFactory, ProcessFactory, ShellProcessFactory};
pub use pool::ProcessPool;
pub use process::{LiveProcess, Process};
pub use reporter::StatusReporter;
pub use service::{WorkerService, WorkerServiceConfig};
