use std::sync::Arc;
use std::time::Duration;

use batchd_core::{HeadClient, JobStatusWorker, StatusReport};
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// 把完成监视任务产生的状态逐条上报给Head，传输失败时带抖动退避重试
pub struct StatusReporter {
    head: Arc<dyn HeadClient>,
    worker: String,
    session: String,
    retry_delay: Duration,
}

impl StatusReporter {
    pub fn new(
        head: Arc<dyn HeadClient>,
        worker: impl Into<String>,
        session: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            head,
            worker: worker.into(),
            session: session.into(),
            retry_delay,
        }
    }

    pub async fn run(
        &self,
        mut statuses: mpsc::UnboundedReceiver<JobStatusWorker>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                status = statuses.recv() => match status {
                    Some(status) => {
                        if !self.deliver(status, &mut shutdown_rx).await {
                            break;
                        }
                    }
                    None => {
                        debug!("状态通道已关闭，上报任务退出");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止状态上报");
                    break;
                }
            }
        }
    }

    /// Returns `false` when shutdown interrupted the retries.
    async fn deliver(
        &self,
        status: JobStatusWorker,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        let mut attempt: u32 = 0;
        loop {
            let report = StatusReport {
                worker: self.worker.clone(),
                session: self.session.clone(),
                status: status.clone(),
            };

            match self.head.report(report).await {
                Ok(()) => {
                    debug!(task_id = %status.job_id, state = ?status.state, "状态已上报");
                    return true;
                }
                Err(e) if e.is_retryable() => {
                    let delay = self.backoff(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        task_id = %status.job_id,
                        attempt,
                        "状态上报失败，{:?} 后重试: {}",
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.recv() => {
                            warn!(task_id = %status.job_id, "关闭时仍有未送达的状态");
                            return false;
                        }
                    }
                }
                Err(e) => {
                    error!(task_id = %status.job_id, "状态上报被拒绝，放弃: {}", e);
                    return true;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .retry_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(MAX_RETRY_DELAY);
        let jitter_ms = (base.as_millis() as u64) / 4;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        base + Duration::from_millis(jitter)
    }
}
