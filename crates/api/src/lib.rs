//! # batchd API
//!
//! Head的HTTP接口，基于Axum。控制客户端（`batchctl`）和Worker都通过它访问Head，
//! [`client::HttpHeadClient`] 是对应的客户端实现。
//!
//! ## API 端点
//!
//! ### 控制面
//! - `POST /api/v1/jobs` - 提交作业
//! - `GET /api/v1/tasks` - 任务列表（按提交顺序）
//! - `GET /api/v1/tasks/{id}` - 任务详情
//! - `GET /api/v1/tasks/{id}/status` - 任务状态
//! - `GET /api/v1/tasks/{id}/wait?fingerprint=&timeoutMs=` - 长轮询等待状态变化
//! - `POST /api/v1/tasks/{id}/cancel` - 取消任务
//! - `POST /api/v1/signal` - 向任务发送信号
//! - `GET /api/v1/procedures` - 过程定义目录
//!
//! ### Worker通道
//! - `POST /api/v1/workers/register` - 注册会话
//! - `POST /api/v1/workers/claim` - 长轮询认领任务
//! - `POST /api/v1/workers/status` - 上报任务状态
//! - `POST /api/v1/workers/heartbeat` - 心跳，返回待投递信号
//!
//! ## 响应格式
//!
//! ```json
//! {
//!   "success": true,
//!   "data": { "taskId": "…", "message": "waiting" },
//!   "message": null,
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! 错误响应：
//!
//! ```json
//! {
//!   "success": false,
//!   "error": {
//!     "message": "unexpected end of expression, expected integer",
//!     "type": "INVALID_REQUIREMENT",
//!     "code": 400,
//!     "timestamp": "2024-01-01T00:00:00Z"
//!   }
//! }
//! ```

pub mod client;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use batchd_head::HeadEngine;

pub use client::HttpHeadClient;
pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use routes::{create_routes, AppState};

/// 创建API应用
pub fn create_app(engine: Arc<HeadEngine>) -> Router {
    create_routes(AppState::new(engine))
}
