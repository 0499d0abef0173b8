//! 任务记录存储实现

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use batchd_core::{SchedulerResult, StoreBackend, StoreConfig, TaskStore};
use tracing::info;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// 按配置创建任务存储
pub async fn create_task_store(config: &StoreConfig) -> SchedulerResult<Arc<dyn TaskStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("使用内存任务存储");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
        StoreBackend::Sqlite => {
            let store = SqliteTaskStore::connect(&config.url, config.max_connections).await?;
            Ok(Arc::new(store))
        }
    }
}
