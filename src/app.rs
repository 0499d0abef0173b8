use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use batchd_api::{create_app, HttpHeadClient};
use batchd_core::{AppConfig, HeadClient};
use batchd_head::{HeadEngine, HeadEngineConfig, LocalHeadClient, LoggingObserver, TaskSweeper};
use batchd_infrastructure::create_task_store;
use batchd_worker::{create_process_factory, WorkerService, WorkerServiceConfig};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行Head（HTTP服务和巡检器）
    Head,
    /// 仅运行Worker，通过HTTP连接Head
    Worker,
    /// 同一进程内运行Head和一个Worker
    All,
}

impl std::str::FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "head" => Ok(AppMode::Head),
            "worker" => Ok(AppMode::Worker),
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

/// 正在运行的Head
pub struct HeadHandle {
    pub engine: Arc<HeadEngine>,
    pub local_addr: SocketAddr,
    server: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl HeadHandle {
    /// 等待HTTP服务和巡检器在关闭信号后退出
    pub async fn join(self) {
        if let Err(e) = self.server.await {
            error!("HTTP服务任务异常退出: {}", e);
        }
        if let Err(e) = self.sweeper.await {
            error!("巡检任务异常退出: {}", e);
        }
    }
}

/// 打开存储、创建引擎并开始监听
pub async fn start_head(
    config: &AppConfig,
    shutdown_rx: &broadcast::Receiver<()>,
) -> Result<HeadHandle> {
    let store = create_task_store(&config.store)
        .await
        .context("打开任务存储失败")?;

    let engine = Arc::new(HeadEngine::new(
        store,
        config.head.procedures.clone(),
        HeadEngineConfig::from(&config.head),
    ));
    engine.add_observer(Arc::new(LoggingObserver::new())).await;

    let sweeper = {
        let sweeper = TaskSweeper::new(Arc::clone(&engine), config.head.sweep_interval());
        let shutdown_rx = shutdown_rx.resubscribe();
        tokio::spawn(async move { sweeper.run(shutdown_rx).await })
    };

    let listener = TcpListener::bind(&config.head.bind_address)
        .await
        .with_context(|| format!("绑定地址失败: {}", config.head.bind_address))?;
    let local_addr = listener.local_addr().context("获取监听地址失败")?;
    info!(
        address = %local_addr,
        procedures = config.head.procedures.len(),
        "Head服务已启动"
    );

    let server = {
        let app = create_app(Arc::clone(&engine));
        let mut shutdown_rx = shutdown_rx.resubscribe();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    info!("HTTP服务收到关闭信号");
                })
                .await;
            if let Err(e) = result {
                error!("HTTP服务运行失败: {}", e);
            }
        })
    };

    Ok(HeadHandle {
        engine,
        local_addr,
        server,
        sweeper,
    })
}

/// 创建Worker服务
pub fn build_worker(config: &AppConfig, head: Arc<dyn HeadClient>) -> Arc<WorkerService> {
    let factory = create_process_factory(&config.worker);
    Arc::new(WorkerService::new(
        WorkerServiceConfig::from(&config.worker),
        head,
        factory,
    ))
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        Self { config, mode }
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Head => self.run_head(shutdown_rx).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::All => self.run_all(shutdown_rx).await,
        }
    }

    async fn run_head(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let head = start_head(&self.config, &shutdown_rx).await?;
        head.join().await;
        info!("Head服务已停止");
        Ok(())
    }

    async fn run_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(
            worker = %self.config.worker.name,
            head = %self.config.worker.head_url,
            "启动Worker服务"
        );
        let head = Arc::new(HttpHeadClient::new(&self.config.worker.head_url)?);
        let worker = build_worker(&self.config, head);
        worker.run(shutdown_rx).await?;
        Ok(())
    }

    /// Head与Worker共享同一个引擎，Worker不经过HTTP
    async fn run_all(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let head = start_head(&self.config, &shutdown_rx).await?;

        let worker = build_worker(
            &self.config,
            Arc::new(LocalHeadClient::new(Arc::clone(&head.engine))),
        );
        let worker_handle = tokio::spawn(worker.run(shutdown_rx));

        match worker_handle.await {
            Ok(Err(e)) => error!("Worker运行失败: {}", e),
            Err(e) => error!("Worker任务异常退出: {}", e),
            Ok(Ok(())) => {}
        }
        head.join().await;

        info!("所有组件已停止");
        Ok(())
    }
}
