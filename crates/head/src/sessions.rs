use std::collections::HashMap;
use std::time::Duration;

use batchd_core::TaskOwner;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Zombie message for tasks whose worker came back under a new session.
pub const WORKER_RESTARTED: &str = "worker restarted";
/// Zombie message for tasks whose worker stopped calling in.
pub const SESSION_EXPIRED: &str = "worker session expired";

#[derive(Debug, Clone)]
struct SessionEntry {
    session: String,
    last_seen: Instant,
}

/// Worker会话注册表
///
/// 每个Worker名称只保留最新的会话。会话在以下情况下不再被承认：
/// - 同名Worker以新会话注册（Worker重启）
/// - 超过 `timeout` 未出现（注册、认领、上报、心跳）
///
/// Head启动后尚未出现过的Worker，从Head启动时刻开始计算超时。
#[derive(Debug)]
pub struct SessionRegistry {
    started_at: Instant,
    timeout: Duration,
    workers: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            timeout,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// 以新会话注册Worker，旧会话随即失效
    pub async fn register(&self, worker: &str, session: &str) {
        let mut workers = self.workers.write().await;
        let previous = workers.insert(
            worker.to_string(),
            SessionEntry {
                session: session.to_string(),
                last_seen: Instant::now(),
            },
        );

        match previous {
            Some(entry) if entry.session != session => {
                info!(worker, old_session = %entry.session, new_session = session, "Worker以新会话重新注册");
            }
            Some(_) => debug!(worker, session, "Worker重复注册同一会话"),
            None => info!(worker, session, "Worker注册"),
        }
    }

    /// 记录会话活动，返回该会话是否仍是Worker的当前会话
    pub async fn touch(&self, worker: &str, session: &str) -> bool {
        let mut workers = self.workers.write().await;
        match workers.get_mut(worker) {
            Some(entry) if entry.session == session => {
                entry.last_seen = Instant::now();
                true
            }
            Some(entry) => {
                debug!(worker, session, current = %entry.session, "忽略已被替代的会话");
                false
            }
            None => {
                // Head重启后首次见到的Worker
                workers.insert(
                    worker.to_string(),
                    SessionEntry {
                        session: session.to_string(),
                        last_seen: Instant::now(),
                    },
                );
                true
            }
        }
    }

    /// Why the owner's session is no longer recognized, if it isn't.
    pub async fn verdict(&self, owner: &TaskOwner) -> Option<&'static str> {
        let now = Instant::now();
        let workers = self.workers.read().await;
        match workers.get(&owner.worker) {
            Some(entry) if entry.session != owner.session => Some(WORKER_RESTARTED),
            Some(entry) if now.duration_since(entry.last_seen) > self.timeout => {
                Some(SESSION_EXPIRED)
            }
            Some(_) => None,
            None if now.duration_since(self.started_at) > self.timeout => Some(SESSION_EXPIRED),
            None => None,
        }
    }
}
