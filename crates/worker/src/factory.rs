use std::process::Stdio;
use std::sync::Arc;

use batchd_core::{ClaimedTask, ProcessFactoryKind, SchedulerError, SchedulerResult, WorkerConfig};
use tokio::process::Command;
use tracing::info;

/// 进程工厂：把认领到的任务变成可启动的命令，并声明并发上限
pub trait ProcessFactory: Send + Sync {
    fn name(&self) -> &str;

    fn maximum_jobs_running(&self) -> usize;

    fn command(&self, task: &ClaimedTask) -> SchedulerResult<Command>;
}

/// Settings become environment variables, plus a few `BATCHD_*` ids.
fn apply_environment(command: &mut Command, task: &ClaimedTask) {
    command
        .envs(task.settings.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .env("BATCHD_TASK_ID", &task.task_id)
        .env("BATCHD_PROCEDURE_ID", &task.procedure_id)
        .env("BATCHD_NODE", &task.data.node)
        .stdin(Stdio::null());
}

/// 通过shell执行过程定义
#[derive(Debug, Clone)]
pub struct ShellProcessFactory {
    shell: String,
    max_jobs: usize,
}

impl ShellProcessFactory {
    pub fn new(shell: impl Into<String>, max_jobs: usize) -> Self {
        Self {
            shell: shell.into(),
            max_jobs,
        }
    }
}

impl ProcessFactory for ShellProcessFactory {
    fn name(&self) -> &str {
        "shell"
    }

    fn maximum_jobs_running(&self) -> usize {
        self.max_jobs
    }

    fn command(&self, task: &ClaimedTask) -> SchedulerResult<Command> {
        let mut command = Command::new(&self.shell);
        if !task.data.definition.trim().is_empty() {
            command.arg("-c").arg(&task.data.definition);
        } else if !task.data.path.is_empty() {
            command.arg(&task.data.path);
        } else {
            return Err(SchedulerError::ProcessCreation(format!(
                "过程 {} 没有可执行的内容",
                task.procedure_id
            )));
        }
        apply_environment(&mut command, task);
        Ok(command)
    }
}

/// 直接执行 `path`，`definition` 按空白切分为参数
#[derive(Debug, Clone)]
pub struct ExecProcessFactory {
    max_jobs: usize,
}

impl ExecProcessFactory {
    pub fn new(max_jobs: usize) -> Self {
        Self { max_jobs }
    }
}

impl ProcessFactory for ExecProcessFactory {
    fn name(&self) -> &str {
        "exec"
    }

    fn maximum_jobs_running(&self) -> usize {
        self.max_jobs
    }

    fn command(&self, task: &ClaimedTask) -> SchedulerResult<Command> {
        if task.data.path.is_empty() {
            return Err(SchedulerError::ProcessCreation(format!(
                "过程 {} 未配置可执行文件路径",
                task.procedure_id
            )));
        }
        let mut command = Command::new(&task.data.path);
        command.args(task.data.definition.split_whitespace());
        apply_environment(&mut command, task);
        Ok(command)
    }
}

/// 按配置选择进程工厂
pub fn create_process_factory(config: &WorkerConfig) -> Arc<dyn ProcessFactory> {
    let factory: Arc<dyn ProcessFactory> = match config.factory {
        ProcessFactoryKind::Shell => Arc::new(ShellProcessFactory::new(
            config.shell.clone(),
            config.max_jobs_running,
        )),
        ProcessFactoryKind::Exec => Arc::new(ExecProcessFactory::new(config.max_jobs_running)),
    };
    info!(
        "使用进程工厂 {}，最大并发 {}",
        factory.name(),
        factory.maximum_jobs_running()
    );
    factory
}
