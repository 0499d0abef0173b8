use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use batchd_core::{ClaimRequest, Heartbeat, RegisterRequest, StatusReport};

use crate::{
    error::ApiResult,
    response::{accepted, success},
    routes::AppState,
};

pub async fn register_worker(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    Ok(success(state.engine.register(request).await?))
}

/// 长轮询认领，超时时 `data` 为 null
pub async fn claim_task(
    State(state): State<AppState>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    Ok(success(state.engine.claim(request).await?))
}

pub async fn report_status(
    State(state): State<AppState>,
    payload: Result<Json<StatusReport>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(report) = payload?;
    state.engine.report(report).await?;
    Ok(accepted())
}

pub async fn heartbeat(
    State(state): State<AppState>,
    payload: Result<Json<Heartbeat>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(heartbeat) = payload?;
    Ok(success(state.engine.heartbeat(heartbeat).await?))
}
