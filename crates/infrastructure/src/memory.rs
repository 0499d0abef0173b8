use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use batchd_core::{SchedulerError, SchedulerResult, Task, TaskState, TaskStore};
use tokio::sync::RwLock;
use tracing::debug;

/// 内存任务存储
///
/// 默认的存储后端，记录随Head进程退出而丢失。
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    sequence: AtomicU64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
        tasks.sort_by_key(|task| task.sequence);
        tasks
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.task_id) {
            return Err(SchedulerError::Internal(format!(
                "任务已存在: {}",
                task.task_id
            )));
        }
        tasks.insert(task.task_id.clone(), task.clone());
        debug!(task_id = %task.task_id, "内存存储插入任务");
        Ok(())
    }

    async fn get(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        Ok(self.tasks.read().await.get(task_id).cloned())
    }

    async fn update(&self, task: &Task) -> SchedulerResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.task_id) {
            Some(existing) if existing.updated_at + 1 == task.updated_at => {
                *existing = task.clone();
                Ok(())
            }
            Some(existing) => {
                debug!(
                    task_id = %task.task_id,
                    stored = existing.updated_at,
                    incoming = task.updated_at,
                    "任务版本不匹配，拒绝更新"
                );
                Err(SchedulerError::ClaimConflict {
                    id: task.task_id.clone(),
                })
            }
            None => Err(SchedulerError::TaskNotFound {
                id: task.task_id.clone(),
            }),
        }
    }

    async fn list(&self) -> SchedulerResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        Ok(Self::sorted(tasks.values().cloned().collect()))
    }

    async fn list_by_state(&self, state: TaskState) -> SchedulerResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        Ok(Self::sorted(
            tasks
                .values()
                .filter(|task| task.state == state)
                .cloned()
                .collect(),
        ))
    }

    async fn next_sequence(&self) -> SchedulerResult<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
