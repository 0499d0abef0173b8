//! 任务记录存储接口
//!
//! Head是任务记录唯一的写入方，所有读写都经过 `TaskStore`：
//! - 内存实现（默认，进程退出即丢失）
//! - SQLite 实现（跨Head重启保留记录）
//!
//! 实现只负责持久化，不做状态机校验；同一任务的变更由Head串行化。

use async_trait::async_trait;

use crate::models::{Task, TaskState};
use crate::SchedulerResult;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 插入新任务，task_id 已存在时返回错误
    async fn insert(&self, task: &Task) -> SchedulerResult<()>;

    async fn get(&self, task_id: &str) -> SchedulerResult<Option<Task>>;

    /// 覆盖已有任务记录，不存在时返回 `TaskNotFound`
    ///
    /// Version-checked: the stored `updated_at` must be exactly one behind
    /// `task.updated_at`, otherwise `ClaimConflict` and nothing is written.
    async fn update(&self, task: &Task) -> SchedulerResult<()>;

    /// 全部任务，按提交顺序排列
    async fn list(&self) -> SchedulerResult<Vec<Task>>;

    /// 指定状态的任务，按提交顺序排列
    async fn list_by_state(&self, state: TaskState) -> SchedulerResult<Vec<Task>>;

    /// 分配下一个提交序号
    async fn next_sequence(&self) -> SchedulerResult<u64>;
}
