use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use batchd_head::HeadEngine;

use crate::handlers::{
    health::health_check,
    jobs::submit_job,
    tasks::{
        cancel_task, get_task, get_task_status, list_procedures, list_tasks, signal_task,
        wait_task,
    },
    workers::{claim_task, heartbeat, register_worker, report_status},
};
use crate::middleware::{cors_layer, trace_layer};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<HeadEngine>,
}

impl AppState {
    pub fn new(engine: Arc<HeadEngine>) -> Self {
        Self { engine }
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 控制面
        .route("/api/v1/jobs", post(submit_job))
        .route("/api/v1/tasks", get(list_tasks))
        .route("/api/v1/tasks/{id}", get(get_task))
        .route("/api/v1/tasks/{id}/status", get(get_task_status))
        .route("/api/v1/tasks/{id}/wait", get(wait_task))
        .route("/api/v1/tasks/{id}/cancel", post(cancel_task))
        .route("/api/v1/signal", post(signal_task))
        .route("/api/v1/procedures", get(list_procedures))
        // Worker通道
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers/claim", post(claim_task))
        .route("/api/v1/workers/status", post(report_status))
        .route("/api/v1/workers/heartbeat", post(heartbeat))
        .layer(trace_layer())
        .layer(cors_layer())
        .with_state(state)
}
