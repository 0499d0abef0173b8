use std::time::Duration;

use async_trait::async_trait;
use batchd_core::{
    ClaimRequest, ClaimedTask, ControlClient, HeadClient, Heartbeat, HeartbeatResponse, Job,
    Procedures, RegisterRequest, RegisterResponse, RunResponse, SchedulerError, SchedulerResult,
    Signal, Status, StatusReport, Task,
};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{error_types, ErrorBody};
use crate::response::ApiResponse;

/// Slack added on top of a long-poll timeout for the HTTP round trip.
const LONG_POLL_GRACE: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 通过HTTP访问Head，Worker和 `batchctl` 共用
#[derive(Debug, Clone)]
pub struct HttpHeadClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpHeadClient {
    pub fn new(base_url: impl Into<String>) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| SchedulerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, timeout: Duration) -> SchedulerResult<T> {
        self.send(self.http_client.get(self.url(path)).timeout(timeout))
            .await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> SchedulerResult<T> {
        self.send(
            self.http_client
                .post(self.url(path))
                .json(body)
                .timeout(timeout),
        )
        .await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> SchedulerResult<T> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SchedulerError::WorkerUnavailable(format!("请求Head超时: {e}"))
            } else {
                SchedulerError::WorkerUnavailable(format!("无法连接Head: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| SchedulerError::Network(format!("读取响应失败: {e}")))?;

        if status.is_success() {
            let envelope: ApiResponse<T> = serde_json::from_slice(&body)?;
            return envelope
                .data
                .ok_or_else(|| SchedulerError::Serialization("响应缺少data字段".to_string()));
        }

        Err(decode_error(status, &body))
    }

    /// Like [`send`](Self::send) but `data: null` is a valid answer.
    async fn post_optional<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> SchedulerResult<Option<T>> {
        let request = self
            .http_client
            .post(self.url(path))
            .json(body)
            .timeout(timeout);
        let response = request
            .send()
            .await
            .map_err(|e| SchedulerError::WorkerUnavailable(format!("无法连接Head: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| SchedulerError::Network(format!("读取响应失败: {e}")))?;

        if status.is_success() {
            let envelope: ApiResponse<Option<T>> = serde_json::from_slice(&body)?;
            return Ok(envelope.data.flatten());
        }
        Err(decode_error(status, &body))
    }
}

/// Rebuilds a [`SchedulerError`] from an error response.
fn decode_error(status: StatusCode, body: &[u8]) -> SchedulerError {
    let Ok(ErrorBody { error, .. }) = serde_json::from_slice::<ErrorBody>(body) else {
        return SchedulerError::Network(format!(
            "HTTP {status}: {}",
            String::from_utf8_lossy(body)
        ));
    };

    match error.error_type.as_str() {
        error_types::TASK_NOT_FOUND => SchedulerError::TaskNotFound { id: error.message },
        error_types::UNKNOWN_PROCEDURE => SchedulerError::UnknownProcedure { id: error.message },
        error_types::INVALID_REQUIREMENT => SchedulerError::InvalidRequirement {
            expr: String::new(),
            message: error.message,
        },
        error_types::INVALID_SIGNAL => SchedulerError::InvalidSignal(error.message),
        error_types::BAD_REQUEST => SchedulerError::InvalidArgument(error.message),
        error_types::CONFLICT => SchedulerError::ClaimConflict { id: error.message },
        error_types::UNAVAILABLE => SchedulerError::WorkerUnavailable(error.message),
        _ if status.is_server_error() => SchedulerError::Internal(error.message),
        _ => SchedulerError::Network(format!("HTTP {status}: {}", error.message)),
    }
}

#[async_trait]
impl HeadClient for HttpHeadClient {
    async fn register(&self, request: RegisterRequest) -> SchedulerResult<RegisterResponse> {
        self.post("/workers/register", &request, REQUEST_TIMEOUT)
            .await
    }

    async fn claim(&self, request: ClaimRequest) -> SchedulerResult<Option<ClaimedTask>> {
        let timeout = Duration::from_millis(request.timeout_ms) + LONG_POLL_GRACE;
        self.post_optional("/workers/claim", &request, timeout)
            .await
    }

    async fn report(&self, report: StatusReport) -> SchedulerResult<()> {
        let response = self
            .http_client
            .post(self.url("/workers/status"))
            .json(&report)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| SchedulerError::WorkerUnavailable(format!("无法连接Head: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(task_id = %report.status.job_id, "状态已送达Head");
            return Ok(());
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(decode_error(status, &body))
    }

    async fn heartbeat(&self, heartbeat: Heartbeat) -> SchedulerResult<HeartbeatResponse> {
        self.post("/workers/heartbeat", &heartbeat, REQUEST_TIMEOUT)
            .await
    }
}

#[async_trait]
impl ControlClient for HttpHeadClient {
    async fn send_event(&self, job: Job) -> SchedulerResult<RunResponse> {
        let expr = job.requirement.clone();
        self.post("/jobs", &job, REQUEST_TIMEOUT)
            .await
            .map_err(|e| match e {
                SchedulerError::InvalidRequirement { message, .. } => {
                    SchedulerError::InvalidRequirement { expr, message }
                }
                SchedulerError::UnknownProcedure { .. } => SchedulerError::UnknownProcedure {
                    id: job.procedure_id.clone(),
                },
                other => other,
            })
    }

    async fn wait_task(
        &self,
        task_id: &str,
        last_fingerprint: Option<u32>,
        timeout: Duration,
    ) -> SchedulerResult<Task> {
        let mut path = format!("/tasks/{task_id}/wait?timeoutMs={}", timeout.as_millis());
        if let Some(fingerprint) = last_fingerprint {
            path.push_str(&format!("&fingerprint={fingerprint}"));
        }
        self.get(&path, timeout + LONG_POLL_GRACE)
            .await
            .map_err(|e| with_task_id(e, task_id))
    }

    async fn cancel_task(&self, task_id: &str) -> SchedulerResult<Status> {
        self.post(&format!("/tasks/{task_id}/cancel"), &(), REQUEST_TIMEOUT)
            .await
            .map_err(|e| with_task_id(e, task_id))
    }

    async fn signal_task(&self, signal: Signal) -> SchedulerResult<Status> {
        self.post("/signal", &signal, REQUEST_TIMEOUT)
            .await
            .map_err(|e| with_task_id(e, &signal.task_id))
    }

    async fn show_task(&self, task_id: &str) -> SchedulerResult<Task> {
        self.get(&format!("/tasks/{task_id}"), REQUEST_TIMEOUT)
            .await
            .map_err(|e| with_task_id(e, task_id))
    }

    async fn show_tasks(&self) -> SchedulerResult<Vec<Task>> {
        self.get("/tasks", REQUEST_TIMEOUT).await
    }

    async fn procedures(&self) -> SchedulerResult<Procedures> {
        self.get("/procedures", REQUEST_TIMEOUT).await
    }
}

fn with_task_id(error: SchedulerError, task_id: &str) -> SchedulerError {
    match error {
        SchedulerError::TaskNotFound { .. } => SchedulerError::TaskNotFound {
            id: task_id.to_string(),
        },
        other => other,
    }
}
