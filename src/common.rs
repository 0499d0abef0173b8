use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use batchd_core::AppConfig;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::{AppMode, Application};
use crate::shutdown::ShutdownManager;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 命令行传入的启动参数，非空时覆盖配置文件
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub worker_name: Option<String>,
    pub head_url: Option<String>,
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先于 `log_level`。
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()
            .context("初始化Compact日志格式失败")?,
        _ => return Err(anyhow::anyhow!("不支持的日志格式: {log_format}")),
    }

    Ok(())
}

/// 加载配置并应用命令行覆盖
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref())?;

    if let Some(ref level) = startup_config.log_level {
        config.logging.level = level.clone();
    }
    if let Some(ref format) = startup_config.log_format {
        config.logging.format = format.clone();
    }
    if let Some(ref name) = startup_config.worker_name {
        config.worker.name = name.clone();
    }
    if let Some(ref url) = startup_config.head_url {
        config.worker.head_url = url.clone();
    }

    config.validate()?;
    Ok(config)
}

/// 启动应用程序并阻塞到收到关闭信号
pub async fn start_application(startup_config: StartupConfig, app_mode: AppMode) -> Result<()> {
    let config = load_config(&startup_config)?;
    init_logging(&config.logging.level, &config.logging.format)?;

    info!("启动 batchd，运行模式: {:?}", app_mode);
    if let Some(ref path) = startup_config.config_path {
        info!("配置文件: {}", path);
    }

    let shutdown_manager = ShutdownManager::new();
    let app = Arc::new(Application::new(config, app_mode));

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
                shutdown_manager.shutdown().await;
            }
        })
    };

    let mut stopped = shutdown_manager.subscribe().await;
    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        _ = stopped.recv() => {}
    }
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(())) => info!("batchd 已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("关闭超时，强制退出"),
    }

    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
}
