use batchd_core::{Task, TaskObserver};
use tracing::{debug, info};

/// 把每次任务状态变更写入日志
#[derive(Debug, Default, Clone)]
pub struct LoggingObserver;

impl LoggingObserver {
    pub fn new() -> Self {
        Self
    }
}

impl TaskObserver for LoggingObserver {
    fn on_update_task(&self, task: &Task) {
        info!(
            task_id = %task.task_id,
            job_id = %task.job_id,
            state = %task.state,
            return_code = task.return_code,
            message = %task.message,
            fingerprint = task.fingerprint,
            worker = task.owner.as_ref().map(|o| o.worker.as_str()).unwrap_or(""),
            "任务状态变更"
        );
    }

    fn timer_event(&self) {
        debug!("巡检定时事件");
    }
}
