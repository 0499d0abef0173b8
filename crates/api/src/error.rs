use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use batchd_core::SchedulerError;
use serde::{Deserialize, Serialize};
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// 错误响应体，`HttpHeadClient` 依据 `type` 还原错误类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: u16,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

pub mod error_types {
    pub const TASK_NOT_FOUND: &str = "TASK_NOT_FOUND";
    pub const UNKNOWN_PROCEDURE: &str = "UNKNOWN_PROCEDURE";
    pub const INVALID_REQUIREMENT: &str = "INVALID_REQUIREMENT";
    pub const INVALID_SIGNAL: &str = "INVALID_SIGNAL";
    pub const CONFLICT: &str = "CONFLICT";
    pub const UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        use error_types::*;

        match self {
            ApiError::Scheduler(SchedulerError::TaskNotFound { id }) => {
                (StatusCode::NOT_FOUND, TASK_NOT_FOUND, format!("任务 {id} 不存在"))
            }
            ApiError::Scheduler(SchedulerError::UnknownProcedure { id }) => (
                StatusCode::BAD_REQUEST,
                UNKNOWN_PROCEDURE,
                format!("过程定义 {id} 不存在"),
            ),
            ApiError::Scheduler(SchedulerError::InvalidRequirement { message, .. }) => {
                (StatusCode::BAD_REQUEST, INVALID_REQUIREMENT, message.clone())
            }
            ApiError::Scheduler(SchedulerError::InvalidSignal(name)) => {
                (StatusCode::BAD_REQUEST, INVALID_SIGNAL, name.clone())
            }
            ApiError::Scheduler(SchedulerError::InvalidArgument(msg)) => {
                (StatusCode::BAD_REQUEST, BAD_REQUEST, msg.clone())
            }
            ApiError::Scheduler(SchedulerError::ClaimConflict { id }) => {
                (StatusCode::CONFLICT, CONFLICT, format!("任务 {id} 已被认领"))
            }
            ApiError::Scheduler(SchedulerError::WorkerUnavailable(msg)) => {
                (StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE, msg.clone())
            }
            ApiError::Scheduler(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_ERROR,
                e.to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, BAD_REQUEST, msg.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = self.parts();
        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        }

        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                message,
                error_type: error_type.to_string(),
                code: status.as_u16(),
                timestamp: chrono::Utc::now(),
            },
        };
        (status, Json(body)).into_response()
    }
}
