use std::time::Duration;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    response::IntoResponse,
    Json,
};
use batchd_core::Signal;
use serde::Deserialize;

use crate::{error::ApiResult, response::success, routes::AppState};

/// Long-poll query. Without `fingerprint` the current task is returned at once.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitQuery {
    pub fingerprint: Option<u32>,
    pub timeout_ms: Option<u64>,
}

const DEFAULT_WAIT_MS: u64 = 30_000;

pub async fn list_tasks(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.engine.show_tasks().await?))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.engine.show_task(&id).await?))
}

pub async fn get_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.engine.status(&id).await?))
}

/// 长轮询等待任务状态变化
pub async fn wait_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<WaitQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let timeout = Duration::from_millis(query.timeout_ms.unwrap_or(DEFAULT_WAIT_MS));
    let task = state
        .engine
        .wait_task(&id, query.fingerprint, timeout)
        .await?;
    Ok(success(task))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.engine.cancel_task(&id).await?))
}

pub async fn signal_task(
    State(state): State<AppState>,
    payload: Result<Json<Signal>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(signal) = payload?;
    Ok(success(state.engine.signal_task(signal).await?))
}

pub async fn list_procedures(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.engine.procedures()))
}
