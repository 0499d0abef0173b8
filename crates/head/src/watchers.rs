use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, OwnedMutexGuard};

/// Per-task fingerprint broadcast used by long-poll waiters.
///
/// A waiter subscribes before reading the store, so any commit that lands
/// after the read is observed as a change on the receiver.
#[derive(Debug, Default)]
pub struct TaskWatchers {
    channels: Mutex<HashMap<String, watch::Sender<u32>>>,
}

impl TaskWatchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, task_id: &str) -> watch::Receiver<u32> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(task_id.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    /// Wakes every waiter on `task_id`. No-op without subscribers.
    pub async fn publish(&self, task_id: &str, fingerprint: u32) {
        let channels = self.channels.lock().await;
        if let Some(sender) = channels.get(task_id) {
            sender.send_replace(fingerprint);
        }
    }

    /// Drops channels nobody is waiting on.
    pub async fn prune(&self) -> usize {
        let mut channels = self.channels.lock().await;
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }
}

/// Serializes mutations per task id.
#[derive(Debug, Default)]
pub struct TaskLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, task_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(task_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Removes locks that are neither held nor awaited.
    pub async fn prune(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }
}
