use batchd_core::{SchedulerError, SchedulerResult, SignalName, TaskState, TaskStatus};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Status message of a placeholder for a task whose process did not survive
/// a worker restart.
pub const ZOMBIE_MESSAGE: &str = "worker restarted";

/// Worker持有的任务进程
///
/// - `Live`: 正在运行或刚结束的操作系统进程
/// - `Zombie`: Worker重启后遗留任务的占位符，不会重新接管原进程
/// - `Failed`: 进程创建失败，失败状态已上报
#[derive(Debug)]
pub enum Process {
    Live(LiveProcess),
    Zombie,
    Failed { message: String },
}

#[derive(Debug)]
pub struct LiveProcess {
    pid: Option<u32>,
    status: watch::Receiver<TaskStatus>,
}

impl LiveProcess {
    pub fn new(pid: Option<u32>, status: watch::Receiver<TaskStatus>) -> Self {
        Self { pid, status }
    }
}

impl Process {
    pub fn status(&self) -> TaskStatus {
        match self {
            Process::Live(live) => live.status.borrow().clone(),
            Process::Zombie => TaskStatus::new(TaskState::Zombie, -1, ZOMBIE_MESSAGE),
            Process::Failed { message } => TaskStatus::new(TaskState::Failed, -1, message.clone()),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Process::Live(_))
    }

    /// 向进程发送信号，占位符上是空操作
    pub async fn signal(&self, signal: SignalName) -> SchedulerResult<()> {
        let pid = match self {
            Process::Live(LiveProcess { pid: Some(pid), status }) => {
                if status.borrow().state.is_terminal() {
                    debug!(pid, %signal, "进程已退出，忽略信号");
                    return Ok(());
                }
                *pid
            }
            Process::Live(LiveProcess { pid: None, .. }) => {
                debug!(%signal, "进程已退出，忽略信号");
                return Ok(());
            }
            Process::Zombie | Process::Failed { .. } => {
                debug!(%signal, "占位进程，忽略信号");
                return Ok(());
            }
        };

        send_signal(pid, signal).await
    }
}

#[cfg(unix)]
async fn send_signal(pid: u32, signal: SignalName) -> SchedulerResult<()> {
    let output = Command::new("kill")
        .arg("-s")
        .arg(signal.as_str())
        .arg(pid.to_string())
        .output()
        .await
        .map_err(|e| SchedulerError::Internal(format!("执行kill命令失败: {e}")))?;

    if output.status.success() {
        info!(pid, %signal, "信号已发送");
        Ok(())
    } else {
        let error_msg = String::from_utf8_lossy(&output.stderr);
        warn!(pid, %signal, "发送信号失败: {}", error_msg.trim());
        Err(SchedulerError::Internal(format!(
            "发送信号失败: {}",
            error_msg.trim()
        )))
    }
}

#[cfg(not(unix))]
async fn send_signal(pid: u32, signal: SignalName) -> SchedulerResult<()> {
    // only forced termination exists here
    let output = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .output()
        .await
        .map_err(|e| SchedulerError::Internal(format!("执行taskkill命令失败: {e}")))?;

    if output.status.success() {
        info!(pid, %signal, "进程已终止");
        Ok(())
    } else {
        Err(SchedulerError::Internal(format!(
            "终止进程失败: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
