//! # 数据模型
//!
//! 定义批处理调度系统的核心数据结构。
//!
//! ## 核心模型
//!
//! ### Task - 任务
//! 作业提交后生成的一次执行实例，由Head的状态机驱动，
//! 状态快照通过 `fingerprint` 做廉价的变更检测。
//!
//! ### Procedure - 过程定义
//! Worker运行任务所用的可执行模板，由Head配置提供。
//!
//! ### 协议消息
//! Head与Worker、控制客户端之间交换的消息，字段统一使用 camelCase。

pub mod procedure;
pub mod protocol;
pub mod signal;
pub mod task;

pub use procedure::Procedure;
pub use protocol::*;
pub use signal::SignalName;
pub use task::{fingerprint, Task, TaskOwner, TaskState, TaskStatus};
