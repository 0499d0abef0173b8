use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use batchd_core::{
    ClaimedTask, JobStatusWorker, SchedulerError, SignalName, TaskState, TaskStatus,
    WorkerJobState,
};
use tokio::process::Child;
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::factory::ProcessFactory;
use crate::process::{LiveProcess, Process};

/// 进程池
///
/// 持有本Worker所有任务对应的 [`Process`]。运行中的进程数量只在进程
/// 启动和退出时原子增减，这是认领循环与完成监视任务之间唯一的共享计数。
pub struct ProcessPool {
    factory: Arc<dyn ProcessFactory>,
    running: Arc<AtomicUsize>,
    processes: Arc<RwLock<HashMap<String, Process>>>,
    slot_released: Arc<Notify>,
    reports: mpsc::UnboundedSender<JobStatusWorker>,
}

impl ProcessPool {
    pub fn new(
        factory: Arc<dyn ProcessFactory>,
        reports: mpsc::UnboundedSender<JobStatusWorker>,
    ) -> Self {
        Self {
            factory,
            running: Arc::new(AtomicUsize::new(0)),
            processes: Arc::new(RwLock::new(HashMap::new())),
            slot_released: Arc::new(Notify::new()),
            reports,
        }
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.running() >= self.factory.maximum_jobs_running()
    }

    /// 等待直到有空闲槽位
    pub async fn wait_for_slot(&self) {
        loop {
            let released = self.slot_released.notified();
            if !self.is_busy() {
                return;
            }
            released.await;
        }
    }

    /// Starts a claimed task. Creation failures are reported as `failed`
    /// right away and leave a [`Process::Failed`] entry behind.
    pub async fn start(&self, task: ClaimedTask) {
        let task_id = task.task_id.clone();

        let spawned = self.factory.command(&task).and_then(|mut command| {
            command.spawn().map_err(|e| {
                SchedulerError::ProcessCreation(format!("启动进程失败: {e}"))
            })
        });

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let message = e.to_string();
                error!(task_id = %task_id, "进程创建失败: {}", message);
                self.processes.write().await.insert(
                    task_id.clone(),
                    Process::Failed {
                        message: message.clone(),
                    },
                );
                self.send_report(JobStatusWorker::failed(task_id, -1, message));
                return;
            }
        };

        let pid = child.id();
        let (status_tx, status_rx) = watch::channel(TaskStatus::new(TaskState::Running, 0, ""));
        self.running.fetch_add(1, Ordering::SeqCst);
        self.processes.write().await.insert(
            task_id.clone(),
            Process::Live(LiveProcess::new(pid, status_rx)),
        );
        info!(task_id = %task_id, pid = ?pid, procedure = %task.procedure_id, "任务进程已启动");

        self.watch_completion(task_id, child, status_tx);
    }

    fn watch_completion(&self, task_id: String, mut child: Child, status_tx: watch::Sender<TaskStatus>) {
        let running = Arc::clone(&self.running);
        let processes = Arc::clone(&self.processes);
        let slot_released = Arc::clone(&self.slot_released);
        let reports = self.reports.clone();

        tokio::spawn(async move {
            let report = match child.wait().await {
                Ok(exit) => exit_report(&task_id, exit),
                Err(e) => JobStatusWorker::failed(&task_id, -1, format!("等待进程结束失败: {e}")),
            };
            info!(task_id = %task_id, state = ?report.state, return_code = report.return_code, "任务进程已结束");

            let terminal = match report.state {
                WorkerJobState::Done => TaskState::Done,
                _ => TaskState::Failed,
            };
            status_tx.send_replace(TaskStatus::new(
                terminal,
                report.return_code,
                report.message.clone(),
            ));

            processes.write().await.remove(&task_id);
            running.fetch_sub(1, Ordering::SeqCst);
            slot_released.notify_one();

            if reports.send(report).is_err() {
                warn!(task_id = %task_id, "状态上报通道已关闭");
            }
        });
    }

    /// 安装重启遗留任务的占位进程
    pub async fn install_zombie(&self, task_id: &str) {
        self.processes
            .write()
            .await
            .insert(task_id.to_string(), Process::Zombie);
        info!(task_id, "为遗留任务安装占位进程");
    }

    /// Forwards a signal to the task's process. Unknown ids are a no-op.
    pub async fn signal(&self, task_id: &str, signal: SignalName) {
        let processes = self.processes.read().await;
        match processes.get(task_id) {
            Some(process) => {
                if let Err(e) = process.signal(signal).await {
                    warn!(task_id, %signal, "转发信号失败: {}", e);
                }
            }
            None => debug!(task_id, %signal, "任务不在本Worker上，忽略信号"),
        }
    }

    /// 移除Head不再需要的占位进程，运行中的进程不受影响
    pub async fn retire(&self, task_ids: &[String]) -> usize {
        let mut processes = self.processes.write().await;
        let mut removed = 0;
        for task_id in task_ids {
            if processes.get(task_id).is_some_and(|p| !p.is_live()) {
                processes.remove(task_id);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "清理已退役的占位进程");
        }
        removed
    }

    pub async fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.processes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.processes.read().await.get(task_id).map(Process::status)
    }

    fn send_report(&self, status: JobStatusWorker) {
        if self.reports.send(status).is_err() {
            warn!("状态上报通道已关闭");
        }
    }
}

fn exit_report(task_id: &str, exit: ExitStatus) -> JobStatusWorker {
    match exit.code() {
        Some(0) => JobStatusWorker::done(task_id),
        Some(code) => JobStatusWorker::failed(task_id, code, format!("process exited with code {code}")),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = exit.signal() {
                    return JobStatusWorker::failed(
                        task_id,
                        -1,
                        format!("terminated by signal {signal}"),
                    );
                }
            }
            JobStatusWorker::failed(task_id, -1, "process exited without a code")
        }
    }
}
