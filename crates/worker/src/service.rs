use std::sync::Arc;
use std::time::Duration;

use batchd_core::{
    ClaimRequest, HeadClient, Heartbeat, JobStatusWorker, RegisterRequest, SchedulerResult,
    SignalName, WorkerConfig, WorkerResources,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::factory::ProcessFactory;
use crate::pool::ProcessPool;
use crate::reporter::StatusReporter;

const MAX_CLAIM_BACKOFF: Duration = Duration::from_secs(30);

/// Worker服务运行参数
#[derive(Debug, Clone)]
pub struct WorkerServiceConfig {
    pub name: String,
    pub resources: WorkerResources,
    pub claim_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub retry_delay: Duration,
}

impl From<&WorkerConfig> for WorkerServiceConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            name: config.name.clone(),
            resources: config.resources.clone(),
            claim_timeout: Duration::from_millis(config.claim_timeout_ms),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
            retry_delay: Duration::from_millis(config.report_retry_delay_ms),
        }
    }
}

/// Worker服务
///
/// 每次启动生成新的会话ID。运行时包含三个循环：认领循环、心跳循环和
/// 状态上报；每个进程另有一个完成监视任务（见 [`ProcessPool`]）。
pub struct WorkerService {
    config: WorkerServiceConfig,
    session: String,
    head: Arc<dyn HeadClient>,
    pool: Arc<ProcessPool>,
    statuses: Mutex<Option<mpsc::UnboundedReceiver<JobStatusWorker>>>,
}

impl WorkerService {
    pub fn new(
        config: WorkerServiceConfig,
        head: Arc<dyn HeadClient>,
        factory: Arc<dyn ProcessFactory>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session: Uuid::new_v4().to_string(),
            pool: Arc::new(ProcessPool::new(factory, tx)),
            statuses: Mutex::new(Some(rx)),
            config,
            head,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn pool(&self) -> &Arc<ProcessPool> {
        &self.pool
    }

    /// 注册新会话，为旧会话遗留的任务安装占位进程
    pub async fn register(&self) -> SchedulerResult<usize> {
        let response = self
            .head
            .register(RegisterRequest {
                worker: self.config.name.clone(),
                session: self.session.clone(),
            })
            .await?;

        for task_id in &response.orphaned {
            self.pool.install_zombie(task_id).await;
        }
        info!(
            worker = %self.config.name,
            session = %self.session,
            orphaned = response.orphaned.len(),
            "Worker会话已注册"
        );
        Ok(response.orphaned.len())
    }

    /// 运行直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        if !self.register_with_retry(&mut shutdown_rx).await {
            return Ok(());
        }

        let reporter = match self.statuses.lock().await.take() {
            Some(statuses) => {
                let reporter = StatusReporter::new(
                    Arc::clone(&self.head),
                    self.config.name.clone(),
                    self.session.clone(),
                    self.config.retry_delay,
                );
                let shutdown = shutdown_rx.resubscribe();
                Some(tokio::spawn(async move { reporter.run(statuses, shutdown).await }))
            }
            None => {
                warn!("状态上报任务已在运行");
                None
            }
        };

        let heartbeat = {
            let service = Arc::clone(&self);
            let shutdown = shutdown_rx.resubscribe();
            tokio::spawn(async move { service.heartbeat_loop(shutdown).await })
        };

        self.claim_loop(shutdown_rx).await;

        if let Err(e) = heartbeat.await {
            error!("心跳任务异常退出: {}", e);
        }
        if let Some(reporter) = reporter {
            if let Err(e) = reporter.await {
                error!("状态上报任务异常退出: {}", e);
            }
        }

        let running = self.pool.running();
        if running > 0 {
            warn!(running, "Worker退出时仍有进程在运行，Head将把这些任务标记为zombie");
        }
        info!(worker = %self.config.name, "Worker服务已停止");
        Ok(())
    }

    async fn register_with_retry(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        let mut delay = self.config.retry_delay;
        loop {
            match self.register().await {
                Ok(_) => return true,
                Err(e) => {
                    warn!("注册Worker失败，{:?} 后重试: {}", delay, e);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.recv() => return false,
                    }
                    delay = (delay * 2).min(MAX_CLAIM_BACKOFF);
                }
            }
        }
    }

    async fn claim_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            worker = %self.config.name,
            resources = ?self.config.resources,
            "启动认领循环"
        );
        let mut delay = self.config.retry_delay;

        loop {
            if self.pool.is_busy() {
                debug!(running = self.pool.running(), "并发已满，等待空闲槽位");
                tokio::select! {
                    _ = self.pool.wait_for_slot() => continue,
                    _ = shutdown_rx.recv() => break,
                }
            }

            let request = ClaimRequest {
                worker: self.config.name.clone(),
                session: self.session.clone(),
                resources: self.config.resources.clone(),
                timeout_ms: self.config.claim_timeout.as_millis() as u64,
            };

            let result = tokio::select! {
                result = self.head.claim(request) => result,
                _ = shutdown_rx.recv() => break,
            };

            match result {
                Ok(Some(task)) => {
                    delay = self.config.retry_delay;
                    info!(task_id = %task.task_id, procedure = %task.procedure_id, "认领到任务");
                    self.pool.start(task).await;
                }
                Ok(None) => {
                    delay = self.config.retry_delay;
                }
                Err(e) => {
                    warn!("认领任务失败，{:?} 后重试: {}", delay, e);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                    delay = (delay * 2).min(MAX_CLAIM_BACKOFF);
                }
            }
        }

        info!("收到关闭信号，退出认领循环");
    }

    async fn heartbeat_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.heartbeat_once().await {
                        warn!("发送心跳失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，退出心跳循环");
                    break;
                }
            }
        }
    }

    /// 发送一次心跳，投递排队的信号并清理已退役的占位进程
    pub async fn heartbeat_once(&self) -> SchedulerResult<()> {
        let response = self
            .head
            .heartbeat(Heartbeat {
                worker: self.config.name.clone(),
                session: self.session.clone(),
                tasks: self.pool.task_ids().await,
            })
            .await?;

        for signal in response.signals {
            match signal.signal.parse::<SignalName>() {
                Ok(name) => self.pool.signal(&signal.task_id, name).await,
                Err(e) => warn!(task_id = %signal.task_id, "无法识别的信号: {}", e),
            }
        }
        self.pool.retire(&response.retired).await;
        Ok(())
    }
}
