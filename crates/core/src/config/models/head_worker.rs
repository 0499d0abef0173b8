use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{Procedure, WorkerResources};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadConfig {
    pub bind_address: String,
    pub sweep_interval_ms: u64,
    /// 作业未指定时的等待超时
    pub default_task_timeout_seconds: u64,
    /// Worker会话在多久未出现后视为失联
    pub session_timeout_seconds: u64,
    /// 长轮询超时上限
    pub max_wait_timeout_ms: u64,
    pub procedures: Vec<Procedure>,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:7070".to_string(),
            sweep_interval_ms: 1000,
            default_task_timeout_seconds: 3600,
            session_timeout_seconds: 30,
            max_wait_timeout_ms: 60_000,
            procedures: Vec::new(),
        }
    }
}

impl HeadConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("Head监听地址不能为空"));
        }

        if self.sweep_interval_ms == 0 {
            return Err(anyhow::anyhow!("巡检间隔必须大于0"));
        }

        if self.session_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("会话超时时间必须大于0"));
        }

        if self.max_wait_timeout_ms == 0 {
            return Err(anyhow::anyhow!("长轮询超时上限必须大于0"));
        }

        let mut seen = HashSet::new();
        for procedure in &self.procedures {
            if procedure.id.is_empty() {
                return Err(anyhow::anyhow!("过程定义ID不能为空"));
            }
            if !seen.insert(procedure.id.as_str()) {
                return Err(anyhow::anyhow!("重复的过程定义: {}", procedure.id));
            }
            if procedure.path.is_empty() && procedure.definition.is_empty() {
                return Err(anyhow::anyhow!(
                    "过程定义 {} 必须提供 path 或 definition",
                    procedure.id
                ));
            }
        }

        Ok(())
    }
}

/// Worker进程工厂类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessFactoryKind {
    /// 通过shell执行 definition
    Shell,
    /// 直接执行 path
    Exec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name: String,
    pub node: String,
    pub head_url: String,
    pub factory: ProcessFactoryKind,
    pub shell: String,
    pub max_jobs_running: usize,
    pub resources: WorkerResources,
    pub claim_timeout_ms: u64,
    pub heartbeat_interval_seconds: u64,
    pub report_retry_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            name: host.clone(),
            node: host,
            head_url: "http://127.0.0.1:7070".to_string(),
            factory: ProcessFactoryKind::Shell,
            shell: "/bin/sh".to_string(),
            max_jobs_running: 4,
            resources: WorkerResources::new(),
            claim_timeout_ms: 30_000,
            heartbeat_interval_seconds: 5,
            report_retry_delay_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("Worker名称不能为空"));
        }

        if self.head_url.is_empty() {
            return Err(anyhow::anyhow!("Head地址不能为空"));
        }
        if !self.head_url.starts_with("http://") && !self.head_url.starts_with("https://") {
            return Err(anyhow::anyhow!("Head地址格式无效: {}", self.head_url));
        }

        if self.factory == ProcessFactoryKind::Shell && self.shell.is_empty() {
            return Err(anyhow::anyhow!("shell工厂必须配置shell路径"));
        }

        if self.max_jobs_running == 0 {
            return Err(anyhow::anyhow!("最大并发作业数必须大于0"));
        }

        if self.claim_timeout_ms == 0 {
            return Err(anyhow::anyhow!("认领超时必须大于0"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        Ok(())
    }
}
