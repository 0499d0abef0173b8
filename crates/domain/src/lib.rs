//! 批处理调度领域逻辑
//!
//! 目前包含决定Worker能否认领任务的资源条件语言。

pub mod condition;

pub use condition::{Condition, ConditionError};
