use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use batchd_core::Job;

use crate::{error::ApiResult, response::created, routes::AppState};

/// 提交作业
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<Job>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(job) = payload?;
    let response = state.engine.submit(job).await?;
    Ok(created(response))
}
