use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::task::TaskState;

/// Named integer capacities a worker advertises on every claim.
pub type WorkerResources = HashMap<String, i64>;

/// 作业提交请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub procedure_id: String,
    #[serde(default)]
    pub settings: Vec<(String, String)>,
    /// 为空时使用过程定义自带的条件
    #[serde(default)]
    pub requirement: String,
    /// 覆盖Head默认的等待超时
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, procedure_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            procedure_id: procedure_id.into(),
            settings: Vec::new(),
            requirement: String::new(),
            timeout_seconds: None,
        }
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirement = requirement.into();
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub task_id: String,
    pub message: String,
}

/// Delivered to a worker with an accepted claim. `job_id` carries the task id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub job_id: String,
    pub node: String,
    pub path: String,
    pub definition: String,
}

/// Worker可以上报的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerJobState {
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusWorker {
    pub job_id: String,
    pub state: WorkerJobState,
    pub return_code: i32,
    pub message: String,
}

impl JobStatusWorker {
    pub fn done(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: WorkerJobState::Done,
            return_code: 0,
            message: String::new(),
        }
    }

    pub fn failed(job_id: impl Into<String>, return_code: i32, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: WorkerJobState::Failed,
            return_code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub task_id: String,
    pub signal: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub state: TaskState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Procedures {
    pub ids: Vec<String>,
}

// ---- worker-facing messages ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub worker: String,
    pub session: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// 仍由该Worker旧会话持有的 running 任务
    pub orphaned: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub worker: String,
    pub session: String,
    #[serde(default)]
    pub resources: WorkerResources,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedTask {
    pub task_id: String,
    pub procedure_id: String,
    pub settings: Vec<(String, String)>,
    pub data: JobData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub worker: String,
    pub session: String,
    pub status: JobStatusWorker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub worker: String,
    pub session: String,
    /// Task ids the worker still holds a Process for.
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub signals: Vec<Signal>,
    /// Head已不再需要Worker保留的任务
    pub retired: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_accepts_minimal_payload() {
        let job: Job =
            serde_json::from_str(r#"{"jobId":"j1","procedureId":"build","settings":[]}"#).unwrap();
        assert_eq!(job, Job::new("j1", "build"));
    }

    #[test]
    fn test_job_status_worker_wire_format() {
        let status = JobStatusWorker::done("t-1");
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"jobId": "t-1", "state": "done", "returnCode": 0, "message": ""})
        );
    }

    #[test]
    fn test_claim_request_defaults_resources() {
        let request: ClaimRequest =
            serde_json::from_str(r#"{"worker":"w","session":"s","timeoutMs":10}"#).unwrap();
        assert!(request.resources.is_empty());
    }
}
