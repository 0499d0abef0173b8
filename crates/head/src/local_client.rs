use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batchd_core::{
    ClaimRequest, ClaimedTask, ControlClient, HeadClient, Heartbeat, HeartbeatResponse, Job,
    Procedures, RegisterRequest, RegisterResponse, RunResponse, SchedulerResult, Signal, Status,
    StatusReport, Task,
};

use crate::engine::HeadEngine;

/// 进程内客户端，`all` 模式下Worker与Head共用一个进程时使用
#[derive(Clone)]
pub struct LocalHeadClient {
    engine: Arc<HeadEngine>,
}

impl LocalHeadClient {
    pub fn new(engine: Arc<HeadEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl HeadClient for LocalHeadClient {
    async fn register(&self, request: RegisterRequest) -> SchedulerResult<RegisterResponse> {
        self.engine.register(request).await
    }

    async fn claim(&self, request: ClaimRequest) -> SchedulerResult<Option<ClaimedTask>> {
        self.engine.claim(request).await
    }

    async fn report(&self, report: StatusReport) -> SchedulerResult<()> {
        self.engine.report(report).await
    }

    async fn heartbeat(&self, heartbeat: Heartbeat) -> SchedulerResult<HeartbeatResponse> {
        self.engine.heartbeat(heartbeat).await
    }
}

#[async_trait]
impl ControlClient for LocalHeadClient {
    async fn send_event(&self, job: Job) -> SchedulerResult<RunResponse> {
        self.engine.submit(job).await
    }

    async fn wait_task(
        &self,
        task_id: &str,
        last_fingerprint: Option<u32>,
        timeout: Duration,
    ) -> SchedulerResult<Task> {
        self.engine
            .wait_task(task_id, last_fingerprint, timeout)
            .await
    }

    async fn cancel_task(&self, task_id: &str) -> SchedulerResult<Status> {
        self.engine.cancel_task(task_id).await
    }

    async fn signal_task(&self, signal: Signal) -> SchedulerResult<Status> {
        self.engine.signal_task(signal).await
    }

    async fn show_task(&self, task_id: &str) -> SchedulerResult<Task> {
        self.engine.show_task(task_id).await
    }

    async fn show_tasks(&self) -> SchedulerResult<Vec<Task>> {
        self.engine.show_tasks().await
    }

    async fn procedures(&self) -> SchedulerResult<Procedures> {
        Ok(self.engine.procedures())
    }
}
