use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use batchd_core::{SchedulerError, SchedulerResult, Task, TaskOwner, TaskState, TaskStore};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument};

const TASK_COLUMNS: &str = "task_id, job_id, procedure_id, settings, requirement, state, \
     return_code, message, fingerprint, updated_at, sequence, submitted_at, deadline, \
     started_at, finished_at, owner_worker, owner_session";

/// SQLite任务存储，Head重启后任务记录仍然保留
pub struct SqliteTaskStore {
    pool: SqlitePool,
    sequence: AtomicU64,
}

impl SqliteTaskStore {
    /// 连接数据库并确保表结构存在
    pub async fn connect(url: &str, max_connections: u32) -> SchedulerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self::new(pool).await?;
        info!("SQLite任务存储已连接: {}", url);
        Ok(store)
    }

    /// 复用已有的连接池
    pub async fn new(pool: SqlitePool) -> SchedulerResult<Self> {
        Self::migrate(&pool).await?;

        let max_sequence: i64 = sqlx::query("SELECT COALESCE(MAX(sequence), 0) AS max_sequence FROM tasks")
            .fetch_one(&pool)
            .await?
            .try_get("max_sequence")?;

        Ok(Self {
            pool,
            sequence: AtomicU64::new(max_sequence.max(0) as u64),
        })
    }

    async fn migrate(pool: &SqlitePool) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id       TEXT PRIMARY KEY,
                job_id        TEXT NOT NULL,
                procedure_id  TEXT NOT NULL,
                settings      TEXT NOT NULL,
                requirement   TEXT NOT NULL,
                state         TEXT NOT NULL,
                return_code   INTEGER NOT NULL,
                message       TEXT NOT NULL,
                fingerprint   INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL,
                sequence      INTEGER NOT NULL UNIQUE,
                submitted_at  TEXT NOT NULL,
                deadline      TEXT NOT NULL,
                started_at    TEXT,
                finished_at   TEXT,
                owner_worker  TEXT,
                owner_session TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks (state, sequence)")
            .execute(pool)
            .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        let settings: String = row.try_get("settings")?;
        let state: String = row.try_get("state")?;
        let fingerprint: i64 = row.try_get("fingerprint")?;
        let updated_at: i64 = row.try_get("updated_at")?;
        let sequence: i64 = row.try_get("sequence")?;
        let owner_worker: Option<String> = row.try_get("owner_worker")?;
        let owner_session: Option<String> = row.try_get("owner_session")?;

        Ok(Task {
            task_id: row.try_get("task_id")?,
            job_id: row.try_get("job_id")?,
            procedure_id: row.try_get("procedure_id")?,
            settings: serde_json::from_str(&settings)?,
            requirement: row.try_get("requirement")?,
            state: TaskState::from_str(&state)?,
            return_code: row.try_get("return_code")?,
            message: row.try_get("message")?,
            fingerprint: u32::try_from(fingerprint).map_err(|_| {
                SchedulerError::Serialization(format!("无效的指纹值: {fingerprint}"))
            })?,
            updated_at: updated_at as u64,
            sequence: sequence as u64,
            submitted_at: row.try_get("submitted_at")?,
            deadline: row.try_get("deadline")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            owner: match (owner_worker, owner_session) {
                (Some(worker), Some(session)) => Some(TaskOwner { worker, session }),
                _ => None,
            },
        })
    }

    async fn fetch_where(&self, clause: &str, state: Option<TaskState>) -> SchedulerResult<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks {clause} ORDER BY sequence ASC");
        let mut query = sqlx::query(&sql);
        if let Some(state) = state {
            query = query.bind(state.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.task_id, state = %task.state))]
    async fn insert(&self, task: &Task) -> SchedulerResult<()> {
        let owner = task.owner.as_ref();
        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&task.task_id)
        .bind(&task.job_id)
        .bind(&task.procedure_id)
        .bind(serde_json::to_string(&task.settings)?)
        .bind(&task.requirement)
        .bind(task.state.as_str())
        .bind(task.return_code)
        .bind(&task.message)
        .bind(i64::from(task.fingerprint))
        .bind(task.updated_at as i64)
        .bind(task.sequence as i64)
        .bind(task.submitted_at)
        .bind(task.deadline)
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(owner.map(|o| o.worker.clone()))
        .bind(owner.map(|o| o.session.clone()))
        .execute(&self.pool)
        .await?;

        debug!("SQLite存储插入任务");
        Ok(())
    }

    async fn get(&self, task_id: &str) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?"))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, task), fields(task_id = %task.task_id, state = %task.state))]
    async fn update(&self, task: &Task) -> SchedulerResult<()> {
        let owner = task.owner.as_ref();
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?, return_code = ?, message = ?, fingerprint = ?, updated_at = ?,
                started_at = ?, finished_at = ?, owner_worker = ?, owner_session = ?
            WHERE task_id = ? AND updated_at = ?
            "#,
        )
        .bind(task.state.as_str())
        .bind(task.return_code)
        .bind(&task.message)
        .bind(i64::from(task.fingerprint))
        .bind(task.updated_at as i64)
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(owner.map(|o| o.worker.clone()))
        .bind(owner.map(|o| o.session.clone()))
        .bind(&task.task_id)
        .bind(task.updated_at.saturating_sub(1) as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM tasks WHERE task_id = ?")
                .bind(&task.task_id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            if exists {
                debug!(version = task.updated_at, "任务版本不匹配，拒绝更新");
                return Err(SchedulerError::ClaimConflict {
                    id: task.task_id.clone(),
                });
            }
            return Err(SchedulerError::TaskNotFound {
                id: task.task_id.clone(),
            });
        }
        Ok(())
    }

    async fn list(&self) -> SchedulerResult<Vec<Task>> {
        self.fetch_where("", None).await
    }

    async fn list_by_state(&self, state: TaskState) -> SchedulerResult<Vec<Task>> {
        self.fetch_where("WHERE state = ?", Some(state)).await
    }

    async fn next_sequence(&self) -> SchedulerResult<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    async fn open(dir: &tempfile::TempDir) -> SqliteTaskStore {
        let url = format!("sqlite://{}", dir.path().join("tasks.db").display());
        SqliteTaskStore::connect(&url, 2).await.unwrap()
    }

    async fn new_task(store: &SqliteTaskStore) -> Task {
        let now = Utc::now();
        Task::new(
            uuid::Uuid::new_v4().to_string(),
            "j1".to_string(),
            "build".to_string(),
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "two".to_string())],
            "cpu >= 2".to_string(),
            store.next_sequence().await.unwrap(),
            now,
            now + Duration::seconds(30),
        )
    }

    #[tokio::test]
    async fn test_round_trip_preserves_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let mut task = new_task(&store).await;
        store.insert(&task).await.unwrap();

        task.owner = Some(TaskOwner {
            worker: "w1".to_string(),
            session: "s1".to_string(),
        });
        task.transition(TaskState::Running, 0, "");
        store.update(&task).await.unwrap();

        let loaded = store.get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.settings, task.settings);
        assert_eq!(loaded.state, TaskState::Running);
        assert_eq!(loaded.fingerprint, task.fingerprint);
        assert_eq!(loaded.updated_at, task.updated_at);
        assert_eq!(loaded.owner, task.owner);
        assert_eq!(loaded.deadline, task.deadline);
        assert!(loaded.started_at.is_some());
    }

    #[tokio::test]
    async fn test_sequence_resumes_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let last = {
            let store = open(&dir).await;
            let a = new_task(&store).await;
            let b = new_task(&store).await;
            store.insert(&a).await.unwrap();
            store.insert(&b).await.unwrap();
            b.sequence
        };

        let store = open(&dir).await;
        assert_eq!(store.list().await.unwrap().len(), 2);
        assert_eq!(store.next_sequence().await.unwrap(), last + 1);
    }

    #[tokio::test]
    async fn test_list_by_state_orders_by_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let task = new_task(&store).await;
            ids.push(task.task_id.clone());
            store.insert(&task).await.unwrap();
        }
        let mut done = store.get(&ids[1]).await.unwrap().unwrap();
        done.transition(TaskState::Done, 0, "");
        store.update(&done).await.unwrap();

        let waiting: Vec<String> = store
            .list_by_state(TaskState::Waiting)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(waiting, vec![ids[0].clone(), ids[2].clone()]);
    }

    #[tokio::test]
    async fn test_stale_update_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let task = new_task(&store).await;
        store.insert(&task).await.unwrap();

        let mut claimed = task.clone();
        claimed.transition(TaskState::Running, 0, "");
        let mut timed_out = task.clone();
        timed_out.transition(TaskState::Timeout, -1, "no eligible worker before deadline");

        store.update(&claimed).await.unwrap();
        assert!(matches!(
            store.update(&timed_out).await,
            Err(SchedulerError::ClaimConflict { id }) if id == task.task_id
        ));
        let loaded = store.get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, TaskState::Running);
        assert_eq!(loaded.updated_at, claimed.updated_at);
    }

    #[tokio::test]
    async fn test_update_unknown_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        let task = new_task(&store).await;
        assert!(matches!(
            store.update(&task).await,
            Err(SchedulerError::TaskNotFound { .. })
        ));
    }
}
