use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SchedulerError;

/// 任务生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Waiting,
    Timeout,
    Running,
    Done,
    Failed,
    Zombie,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Timeout => "timeout",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
            TaskState::Zombie => "zombie",
        }
    }

    /// 终态任务不会再发生任何迁移
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Timeout | TaskState::Done | TaskState::Failed | TaskState::Zombie
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TaskState::Waiting),
            "timeout" => Ok(TaskState::Timeout),
            "running" => Ok(TaskState::Running),
            "done" => Ok(TaskState::Done),
            "failed" => Ok(TaskState::Failed),
            "zombie" => Ok(TaskState::Zombie),
            other => Err(SchedulerError::Serialization(format!(
                "未知的任务状态: {other}"
            ))),
        }
    }
}

/// CRC-32 over the observable status triple.
///
/// Fields are separated so that `("ab", 1, "")` and `("a", 1, "b")` style
/// shifts cannot alias.
pub fn fingerprint(state: TaskState, return_code: i32, message: &str) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(state.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(&return_code.to_le_bytes());
    hasher.update(&[0]);
    hasher.update(message.as_bytes());
    hasher.finalize()
}

/// 任务状态快照，也是Worker侧Process暴露的三元组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    pub return_code: i32,
    pub message: String,
}

impl TaskStatus {
    pub fn new(state: TaskState, return_code: i32, message: impl Into<String>) -> Self {
        Self {
            state,
            return_code,
            message: message.into(),
        }
    }

    pub fn fingerprint(&self) -> u32 {
        fingerprint(self.state, self.return_code, &self.message)
    }
}

/// 认领任务的Worker会话
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOwner {
    pub worker: String,
    pub session: String,
}

/// 作业提交后生成的一次执行实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub job_id: String,
    pub procedure_id: String,
    pub settings: Vec<(String, String)>,
    pub requirement: String,
    pub state: TaskState,
    pub return_code: i32,
    pub message: String,
    pub fingerprint: u32,
    /// 逻辑版本号，每次变更严格递增
    pub updated_at: u64,
    /// 提交顺序，认领时按FIFO选择
    pub sequence: u64,
    pub submitted_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub owner: Option<TaskOwner>,
}

impl Task {
    /// 创建处于 waiting 状态的新任务
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: String,
        job_id: String,
        procedure_id: String,
        settings: Vec<(String, String)>,
        requirement: String,
        sequence: u64,
        submitted_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            job_id,
            procedure_id,
            settings,
            requirement,
            state: TaskState::Waiting,
            return_code: 0,
            message: String::new(),
            fingerprint: fingerprint(TaskState::Waiting, 0, ""),
            updated_at: 1,
            sequence,
            submitted_at,
            deadline,
            started_at: None,
            finished_at: None,
            owner: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::new(self.state, self.return_code, self.message.clone())
    }

    /// Applies a state change and recomputes the fingerprint.
    ///
    /// Callers serialize transitions per task; every call bumps the version.
    pub fn transition(&mut self, state: TaskState, return_code: i32, message: impl Into<String>) {
        let now = Utc::now();
        self.state = state;
        self.return_code = return_code;
        self.message = message.into();
        self.fingerprint = fingerprint(self.state, self.return_code, &self.message);
        self.updated_at += 1;

        if state == TaskState::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if state.is_terminal() {
            self.finished_at = Some(now);
        }
    }

    pub fn is_owned_by(&self, worker: &str, session: &str) -> bool {
        self.owner
            .as_ref()
            .is_some_and(|owner| owner.worker == worker && owner.session == session)
    }
}
