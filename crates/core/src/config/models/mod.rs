pub mod app_config;
pub mod head_worker;
pub mod store_logging;

pub use app_config::AppConfig;
pub use head_worker::{HeadConfig, ProcessFactoryKind, WorkerConfig};
pub use store_logging::{LoggingConfig, StoreBackend, StoreConfig};
