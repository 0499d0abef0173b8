//! batchd：分布式批处理作业调度系统
//!
//! 二进制 `batchd` 以 head、worker 或 all 模式运行，`batchctl` 是面向
//! 用户的控制客户端。

pub mod app;
pub mod common;
pub mod shutdown;

pub use app::{build_worker, start_head, AppMode, Application, HeadHandle};
pub use common::{init_logging, load_config, start_application, StartupConfig};
pub use shutdown::ShutdownManager;
