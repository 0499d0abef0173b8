use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("未知的过程定义: {id}")]
    UnknownProcedure { id: String },

    #[error("无效的资源条件表达式: '{expr}' - {message}")]
    InvalidRequirement { expr: String, message: String },

    #[error("无效的信号: {0}")]
    InvalidSignal(String),

    /// 请求格式正确但取值不可接受，例如超时时间超出范围
    #[error("无效的请求参数: {0}")]
    InvalidArgument(String),

    /// 其他认领者已经赢得该任务，仅在Head内部重试
    #[error("任务已被其他Worker认领: {id}")]
    ClaimConflict { id: String },

    #[error("进程创建失败: {0}")]
    ProcessCreation(String),

    #[error("Worker不可用: {0}")]
    WorkerUnavailable(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 传输层错误可以安全重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::WorkerUnavailable(_)
                | SchedulerError::Network(_)
                | SchedulerError::ClaimConflict { .. }
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
