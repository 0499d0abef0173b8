use std::time::Duration;

use async_trait::async_trait;

use crate::models::{
    ClaimRequest, ClaimedTask, Heartbeat, HeartbeatResponse, Job, Procedures, RegisterRequest,
    RegisterResponse, RunResponse, Signal, Status, StatusReport, Task,
};
use crate::SchedulerResult;

/// Worker到Head的通道
#[async_trait]
pub trait HeadClient: Send + Sync {
    /// 开启新的Worker会话，返回旧会话遗留的任务
    async fn register(&self, request: RegisterRequest) -> SchedulerResult<RegisterResponse>;

    /// 长轮询认领下一个满足资源条件的任务，超时返回 `None`
    async fn claim(&self, request: ClaimRequest) -> SchedulerResult<Option<ClaimedTask>>;

    async fn report(&self, report: StatusReport) -> SchedulerResult<()>;

    async fn heartbeat(&self, heartbeat: Heartbeat) -> SchedulerResult<HeartbeatResponse>;
}

/// 控制客户端到Head的通道
#[async_trait]
pub trait ControlClient: Send + Sync {
    async fn send_event(&self, job: Job) -> SchedulerResult<RunResponse>;

    /// Blocks until the fingerprint differs from `last_fingerprint` or the
    /// timeout elapses. `None` returns the current status immediately.
    async fn wait_task(
        &self,
        task_id: &str,
        last_fingerprint: Option<u32>,
        timeout: Duration,
    ) -> SchedulerResult<Task>;

    async fn cancel_task(&self, task_id: &str) -> SchedulerResult<Status>;

    async fn signal_task(&self, signal: Signal) -> SchedulerResult<Status>;

    async fn show_task(&self, task_id: &str) -> SchedulerResult<Task>;

    async fn show_tasks(&self) -> SchedulerResult<Vec<Task>>;

    async fn procedures(&self) -> SchedulerResult<Procedures>;
}
