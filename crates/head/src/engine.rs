use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use batchd_core::{
    ClaimRequest, ClaimedTask, HeadConfig, Heartbeat, HeartbeatResponse, Job, JobData, Procedure,
    Procedures, RegisterRequest, RegisterResponse, RunResponse, SchedulerError, SchedulerResult,
    Signal, SignalName, Status, StatusReport, Task, TaskObserver, TaskOwner, TaskState, TaskStore,
    WorkerJobState, WorkerResources,
};
use batchd_domain::Condition;
use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sessions::SessionRegistry;
use crate::watchers::{TaskLocks, TaskWatchers};

/// Message stored on a waiting task that was cancelled.
pub const CANCELLED_BEFORE_START: &str = "cancelled before start";
/// Message stored on a waiting task whose deadline passed.
pub const DEADLINE_EXCEEDED: &str = "no eligible worker before deadline";

/// Head引擎运行参数
#[derive(Debug, Clone)]
pub struct HeadEngineConfig {
    pub default_task_timeout: Duration,
    pub session_timeout: Duration,
    pub max_wait_timeout: Duration,
}

impl Default for HeadEngineConfig {
    fn default() -> Self {
        Self::from(&HeadConfig::default())
    }
}

impl From<&HeadConfig> for HeadEngineConfig {
    fn from(config: &HeadConfig) -> Self {
        Self {
            default_task_timeout: Duration::from_secs(config.default_task_timeout_seconds),
            session_timeout: Duration::from_secs(config.session_timeout_seconds),
            max_wait_timeout: Duration::from_millis(config.max_wait_timeout_ms),
        }
    }
}

/// 一次巡检的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub timed_out: Vec<String>,
    pub zombied: Vec<String>,
}

/// 任务状态机
///
/// Head唯一的可变状态是任务存储；其余结构（条件缓存、会话、等待通道、
/// 待投递信号）都可以从存储和Worker后续的请求中重建。
pub struct HeadEngine {
    store: Arc<dyn TaskStore>,
    procedures: BTreeMap<String, Procedure>,
    config: HeadEngineConfig,
    conditions: RwLock<HashMap<String, Condition>>,
    sessions: SessionRegistry,
    watchers: TaskWatchers,
    task_locks: TaskLocks,
    claim_lock: Mutex<()>,
    submitted: Notify,
    pending_signals: Mutex<HashMap<TaskOwner, Vec<Signal>>>,
    observers: RwLock<Vec<Arc<dyn TaskObserver>>>,
}

impl HeadEngine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        procedures: Vec<Procedure>,
        config: HeadEngineConfig,
    ) -> Self {
        let procedures = procedures
            .into_iter()
            .map(|procedure| (procedure.id.clone(), procedure))
            .collect();

        Self {
            store,
            procedures,
            sessions: SessionRegistry::new(config.session_timeout),
            config,
            conditions: RwLock::new(HashMap::new()),
            watchers: TaskWatchers::new(),
            task_locks: TaskLocks::new(),
            claim_lock: Mutex::new(()),
            submitted: Notify::new(),
            pending_signals: Mutex::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn task_store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    pub async fn add_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.observers.write().await.push(observer);
    }

    pub fn procedures(&self) -> Procedures {
        Procedures {
            ids: self.procedures.keys().cloned().collect(),
        }
    }

    // ---- control surface ----

    /// 提交作业，条件表达式在此处编译，格式错误时任务不会被创建
    pub async fn submit(&self, job: Job) -> SchedulerResult<RunResponse> {
        let procedure = self.procedures.get(&job.procedure_id).ok_or_else(|| {
            SchedulerError::UnknownProcedure {
                id: job.procedure_id.clone(),
            }
        })?;

        let requirement = if job.requirement.trim().is_empty() {
            procedure.requirement.clone()
        } else {
            job.requirement.clone()
        };
        let condition =
            Condition::compile(&requirement).map_err(|e| SchedulerError::InvalidRequirement {
                expr: requirement.clone(),
                message: e.to_string(),
            })?;

        let timeout = job
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_task_timeout);
        let now = Utc::now();
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .ok_or_else(|| {
                SchedulerError::InvalidArgument(format!("timeoutSeconds 超出范围: {timeout:?}"))
            })?;

        let task = Task::new(
            Uuid::new_v4().to_string(),
            job.job_id,
            job.procedure_id,
            job.settings,
            requirement,
            self.store.next_sequence().await?,
            now,
            deadline,
        );

        self.conditions
            .write()
            .await
            .insert(task.task_id.clone(), condition);
        if let Err(e) = self.store.insert(&task).await {
            self.conditions.write().await.remove(&task.task_id);
            return Err(e);
        }

        info!(
            task_id = %task.task_id,
            job_id = %task.job_id,
            procedure = %task.procedure_id,
            requirement = %task.requirement,
            "任务已提交"
        );
        self.announce(&task).await;
        self.submitted.notify_waiters();

        Ok(RunResponse {
            task_id: task.task_id,
            message: TaskState::Waiting.to_string(),
        })
    }

    pub async fn show_task(&self, task_id: &str) -> SchedulerResult<Task> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    pub async fn show_tasks(&self) -> SchedulerResult<Vec<Task>> {
        self.store.list().await
    }

    pub async fn status(&self, task_id: &str) -> SchedulerResult<Status> {
        let task = self.show_task(task_id).await?;
        Ok(Status { state: task.state })
    }

    /// Long-poll: returns once the fingerprint differs from `last_fingerprint`
    /// or the (clamped) timeout elapses. Without a fingerprint it returns at once.
    pub async fn wait_task(
        &self,
        task_id: &str,
        last_fingerprint: Option<u32>,
        timeout: Duration,
    ) -> SchedulerResult<Task> {
        let deadline = Instant::now() + timeout.min(self.config.max_wait_timeout);
        let mut changes = self.watchers.subscribe(task_id).await;

        loop {
            let task = self.show_task(task_id).await?;
            match last_fingerprint {
                Some(known) if known == task.fingerprint => {}
                _ => return Ok(task),
            }

            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                // Sender gone or deadline hit: answer with whatever is current.
                Ok(Err(_)) | Err(_) => return self.show_task(task_id).await,
            }
        }
    }

    /// waiting 任务直接失败；running 任务向所属Worker转发 TERM
    pub async fn cancel_task(&self, task_id: &str) -> SchedulerResult<Status> {
        let _guard = self.task_locks.lock(task_id).await;
        let mut task = self.show_task(task_id).await?;

        match task.state {
            TaskState::Waiting => {
                task.transition(TaskState::Failed, -1, CANCELLED_BEFORE_START);
                self.commit(&task).await?;
                self.conditions.write().await.remove(task_id);
                info!(task_id, "等待中的任务已取消");
            }
            TaskState::Running => {
                self.queue_signal(&task, SignalName::Term).await;
            }
            state => debug!(task_id, %state, "任务已结束，忽略取消请求"),
        }

        Ok(Status { state: task.state })
    }

    /// 信号只转发给 running 任务，其余状态（包括 zombie）静默忽略
    pub async fn signal_task(&self, signal: Signal) -> SchedulerResult<Status> {
        let name: SignalName = signal.signal.parse()?;
        let task = self.show_task(&signal.task_id).await?;

        if task.state == TaskState::Running {
            self.queue_signal(&task, name).await;
        } else {
            debug!(task_id = %task.task_id, state = %task.state, signal = %name, "任务未在运行，忽略信号");
        }

        Ok(Status { state: task.state })
    }

    // ---- worker surface ----

    pub async fn register(&self, request: RegisterRequest) -> SchedulerResult<RegisterResponse> {
        self.sessions
            .register(&request.worker, &request.session)
            .await;

        let orphaned: Vec<String> = self
            .store
            .list_by_state(TaskState::Running)
            .await?
            .into_iter()
            .filter(|task| {
                task.owner.as_ref().is_some_and(|owner| {
                    owner.worker == request.worker && owner.session != request.session
                })
            })
            .map(|task| task.task_id)
            .collect();

        if !orphaned.is_empty() {
            warn!(
                worker = %request.worker,
                count = orphaned.len(),
                "Worker重启，旧会话仍持有运行中的任务"
            );
        }
        Ok(RegisterResponse { orphaned })
    }

    /// Long-poll claim. Returns `None` when nothing eligible shows up before
    /// the timeout.
    pub async fn claim(&self, request: ClaimRequest) -> SchedulerResult<Option<ClaimedTask>> {
        let timeout = Duration::from_millis(request.timeout_ms).min(self.config.max_wait_timeout);
        let deadline = Instant::now() + timeout;

        if !self.sessions.touch(&request.worker, &request.session).await {
            warn!(worker = %request.worker, session = %request.session, "已被替代的会话尝试认领任务");
            // hold the poll so a stale worker does not spin
            tokio::time::sleep_until(deadline).await;
            return Ok(None);
        }

        loop {
            // Register interest before scanning so a submission in between
            // is not missed.
            let submitted = self.submitted.notified();
            tokio::pin!(submitted);
            submitted.as_mut().enable();

            if let Some(claimed) = self.try_claim(&request).await? {
                return Ok(Some(claimed));
            }

            if tokio::time::timeout_at(deadline, submitted).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn try_claim(&self, request: &ClaimRequest) -> SchedulerResult<Option<ClaimedTask>> {
        let _claim_guard = self.claim_lock.lock().await;

        for candidate in self.store.list_by_state(TaskState::Waiting).await? {
            if !self.is_eligible(&candidate, &request.resources).await {
                continue;
            }

            match self.claim_task(&candidate.task_id, request).await {
                Ok(task) => return Ok(Some(self.claimed_task(task, &request.worker))),
                Err(SchedulerError::ClaimConflict { id }) => {
                    debug!(task_id = %id, "任务状态已变化，继续尝试下一个");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn claim_task(&self, task_id: &str, request: &ClaimRequest) -> SchedulerResult<Task> {
        let _guard = self.task_locks.lock(task_id).await;
        let mut task = self.show_task(task_id).await?;
        if task.state != TaskState::Waiting {
            return Err(SchedulerError::ClaimConflict {
                id: task_id.to_string(),
            });
        }

        task.owner = Some(TaskOwner {
            worker: request.worker.clone(),
            session: request.session.clone(),
        });
        task.transition(TaskState::Running, 0, "");
        self.commit(&task).await?;
        self.conditions.write().await.remove(task_id);

        info!(task_id, worker = %request.worker, "任务已被认领");
        Ok(task)
    }

    async fn is_eligible(&self, task: &Task, resources: &WorkerResources) -> bool {
        if let Some(condition) = self.conditions.read().await.get(&task.task_id) {
            return condition.evaluate(resources);
        }

        // Not cached: the task predates this head process.
        match Condition::compile(&task.requirement) {
            Ok(condition) => {
                let eligible = condition.evaluate(resources);
                self.cache_condition(&task.task_id, condition).await;
                eligible
            }
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "存储中的条件表达式无法解析，任务不可认领");
                false
            }
        }
    }

    /// Cancel and sweep remove the entry after committing a terminal state,
    /// so checking the stored state under the write lock cannot leak one.
    async fn cache_condition(&self, task_id: &str, condition: Condition) {
        let mut conditions = self.conditions.write().await;
        match self.store.get(task_id).await {
            Ok(Some(task)) if task.state == TaskState::Waiting => {
                conditions.insert(task_id.to_string(), condition);
            }
            Ok(_) => debug!(task_id, "任务已离开等待状态，不缓存条件"),
            Err(e) => warn!(task_id, error = %e, "读取任务失败，不缓存条件"),
        }
    }

    fn claimed_task(&self, task: Task, worker: &str) -> ClaimedTask {
        let procedure = self.procedures.get(&task.procedure_id);
        if procedure.is_none() {
            warn!(task_id = %task.task_id, procedure = %task.procedure_id, "过程定义已不在目录中");
        }

        ClaimedTask {
            data: JobData {
                job_id: task.task_id.clone(),
                node: worker.to_string(),
                path: procedure.map(|p| p.path.clone()).unwrap_or_default(),
                definition: procedure.map(|p| p.definition.clone()).unwrap_or_default(),
            },
            task_id: task.task_id,
            procedure_id: task.procedure_id,
            settings: task.settings,
        }
    }

    /// Applies a worker's status report. Reports for tasks that are not
    /// running, or that the reporting session does not own, are ignored.
    pub async fn report(&self, report: StatusReport) -> SchedulerResult<()> {
        let StatusReport {
            worker,
            session,
            status,
        } = report;
        let task_id = status.job_id.as_str();

        self.sessions.touch(&worker, &session).await;
        let _guard = self.task_locks.lock(task_id).await;

        let Some(mut task) = self.store.get(task_id).await? else {
            warn!(task_id, worker = %worker, "上报的任务不存在，忽略");
            return Ok(());
        };
        if task.state != TaskState::Running {
            debug!(task_id, state = %task.state, "任务不在运行状态，忽略上报");
            return Ok(());
        }
        if !task.is_owned_by(&worker, &session) {
            warn!(task_id, worker = %worker, session = %session, "上报来自非所属会话，忽略");
            return Ok(());
        }

        let state = match status.state {
            WorkerJobState::Running => return Ok(()),
            WorkerJobState::Done => TaskState::Done,
            WorkerJobState::Failed => TaskState::Failed,
        };
        task.transition(state, status.return_code, status.message);
        self.commit(&task).await?;

        info!(task_id, %state, return_code = task.return_code, "任务执行结束");
        Ok(())
    }

    pub async fn heartbeat(&self, heartbeat: Heartbeat) -> SchedulerResult<HeartbeatResponse> {
        self.sessions
            .touch(&heartbeat.worker, &heartbeat.session)
            .await;

        let signals = self
            .pending_signals
            .lock()
            .await
            .remove(&TaskOwner {
                worker: heartbeat.worker.clone(),
                session: heartbeat.session.clone(),
            })
            .unwrap_or_default();

        // Orphans of an earlier session stay held until the sweep zombifies them.
        let mut retired = Vec::new();
        for task_id in heartbeat.tasks {
            let running = self
                .store
                .get(&task_id)
                .await?
                .is_some_and(|task| task.state == TaskState::Running);
            if !running {
                retired.push(task_id);
            }
        }

        Ok(HeartbeatResponse { signals, retired })
    }

    // ---- sweep ----

    /// Times out overdue waiting tasks and zombifies running tasks whose
    /// owner session is gone, then fires `timer_event` on every observer.
    pub async fn sweep(&self) -> SchedulerResult<SweepOutcome> {
        let mut outcome = SweepOutcome::default();
        let now = Utc::now();

        for task in self.store.list_by_state(TaskState::Waiting).await? {
            if now < task.deadline {
                continue;
            }
            let _guard = self.task_locks.lock(&task.task_id).await;
            let mut task = self.show_task(&task.task_id).await?;
            if task.state != TaskState::Waiting || now < task.deadline {
                continue;
            }
            task.transition(TaskState::Timeout, -1, DEADLINE_EXCEEDED);
            self.commit(&task).await?;
            self.conditions.write().await.remove(&task.task_id);
            warn!(task_id = %task.task_id, "任务等待超时");
            outcome.timed_out.push(task.task_id);
        }

        for task in self.store.list_by_state(TaskState::Running).await? {
            let Some(owner) = task.owner.clone() else {
                continue;
            };
            let Some(reason) = self.sessions.verdict(&owner).await else {
                continue;
            };
            let _guard = self.task_locks.lock(&task.task_id).await;
            let mut task = self.show_task(&task.task_id).await?;
            if task.state != TaskState::Running || task.owner.as_ref() != Some(&owner) {
                continue;
            }
            task.transition(TaskState::Zombie, -1, reason);
            self.commit(&task).await?;
            warn!(task_id = %task.task_id, worker = %owner.worker, reason, "任务所属Worker已失联");
            outcome.zombied.push(task.task_id);
        }

        self.prune_signals().await;

        for observer in self.observers.read().await.iter() {
            observer.timer_event();
        }

        let pruned = self.watchers.prune().await + self.task_locks.prune().await;
        if pruned > 0 {
            debug!(pruned, "清理空闲的等待通道和任务锁");
        }

        Ok(outcome)
    }

    // ---- internals ----

    async fn commit(&self, task: &Task) -> SchedulerResult<()> {
        self.store.update(task).await?;
        self.announce(task).await;
        Ok(())
    }

    async fn announce(&self, task: &Task) {
        self.watchers.publish(&task.task_id, task.fingerprint).await;
        for observer in self.observers.read().await.iter() {
            observer.on_update_task(task);
        }
    }

    /// Drops signals queued for sessions that will never heartbeat again.
    async fn prune_signals(&self) {
        let mut pending = self.pending_signals.lock().await;
        let mut dead = Vec::new();
        for owner in pending.keys() {
            if self.sessions.verdict(owner).await.is_some() {
                dead.push(owner.clone());
            }
        }
        for owner in dead {
            if let Some(signals) = pending.remove(&owner) {
                debug!(worker = %owner.worker, session = %owner.session, dropped = signals.len(), "丢弃已失效会话的待投递信号");
            }
        }
    }

    async fn queue_signal(&self, task: &Task, name: SignalName) {
        let Some(owner) = &task.owner else {
            return;
        };
        self.pending_signals
            .lock()
            .await
            .entry(owner.clone())
            .or_default()
            .push(Signal {
                task_id: task.task_id.clone(),
                signal: name.to_string(),
            });
        info!(task_id = %task.task_id, worker = %owner.worker, signal = %name, "信号已排队等待投递");
    }
}

#[cfg(test)]
mod tests {
    use batchd_infrastructure::InMemoryTaskStore;
    use tracing_test::traced_test;

    use super::*;

    fn engine() -> HeadEngine {
        HeadEngine::new(
            Arc::new(InMemoryTaskStore::new()),
            vec![Procedure::shell("build", "make")],
            HeadEngineConfig::default(),
        )
    }

    fn request(worker: &str, session: &str) -> ClaimRequest {
        ClaimRequest {
            worker: worker.to_string(),
            session: session.to_string(),
            resources: WorkerResources::new(),
            timeout_ms: 10,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_superseded_session_cannot_claim() {
        let engine = engine();
        engine.submit(Job::new("j1", "build")).await.unwrap();
        engine
            .register(RegisterRequest {
                worker: "w1".to_string(),
                session: "new".to_string(),
            })
            .await
            .unwrap();

        assert!(engine.claim(request("w1", "old")).await.unwrap().is_none());
        assert!(logs_contain("已被替代的会话尝试认领任务"));
        assert!(engine.claim(request("w1", "new")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_conditions_cache_is_released_on_claim() {
        let engine = engine();
        engine.submit(Job::new("j1", "build")).await.unwrap();
        assert_eq!(engine.conditions.read().await.len(), 1);

        engine.claim(request("w1", "s1")).await.unwrap().unwrap();
        assert!(engine.conditions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_signals_for_replaced_session_are_dropped_on_sweep() {
        let engine = engine();
        let task_id = engine.submit(Job::new("j1", "build")).await.unwrap().task_id;
        engine.claim(request("w1", "s1")).await.unwrap().unwrap();
        engine.cancel_task(&task_id).await.unwrap();
        assert_eq!(engine.pending_signals.lock().await.len(), 1);

        engine
            .register(RegisterRequest {
                worker: "w1".to_string(),
                session: "s2".to_string(),
            })
            .await
            .unwrap();
        engine.sweep().await.unwrap();
        assert!(engine.pending_signals.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_live_session_keeps_queued_signals_across_sweep() {
        let engine = engine();
        let task_id = engine.submit(Job::new("j1", "build")).await.unwrap().task_id;
        engine.claim(request("w1", "s1")).await.unwrap().unwrap();
        engine.cancel_task(&task_id).await.unwrap();

        engine.sweep().await.unwrap();
        let response = engine
            .heartbeat(Heartbeat {
                worker: "w1".to_string(),
                session: "s1".to_string(),
                tasks: vec![task_id.clone()],
            })
            .await
            .unwrap();
        assert_eq!(response.signals.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_candidate_does_not_repopulate_cache() {
        let engine = engine();
        let task_id = engine.submit(Job::new("j1", "build")).await.unwrap().task_id;
        let snapshot = engine.show_task(&task_id).await.unwrap();

        // as after a head restart: nothing cached yet
        engine.conditions.write().await.clear();
        engine.cancel_task(&task_id).await.unwrap();

        assert!(engine.is_eligible(&snapshot, &WorkerResources::new()).await);
        assert!(engine.conditions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_uncached_waiting_task_is_cached_on_scan() {
        let engine = engine();
        let task_id = engine.submit(Job::new("j1", "build")).await.unwrap().task_id;
        let snapshot = engine.show_task(&task_id).await.unwrap();
        engine.conditions.write().await.clear();

        assert!(engine.is_eligible(&snapshot, &WorkerResources::new()).await);
        assert!(engine.conditions.read().await.contains_key(&task_id));
    }

    #[tokio::test]
    async fn test_out_of_range_timeout_is_rejected() {
        let engine = engine();
        let mut job = Job::new("j1", "build");
        job.timeout_seconds = Some(u64::MAX);

        let err = engine.submit(job).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidArgument(_)));
        assert!(engine.show_tasks().await.unwrap().is_empty());
        assert!(engine.conditions.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_procedures_are_sorted() {
        let engine = HeadEngine::new(
            Arc::new(InMemoryTaskStore::new()),
            vec![Procedure::shell("zeta", "true"), Procedure::shell("alpha", "true")],
            HeadEngineConfig::default(),
        );
        assert_eq!(engine.procedures().ids, vec!["alpha", "zeta"]);
    }
}
