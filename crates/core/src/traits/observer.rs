use crate::models::Task;

/// Receives every committed task transition, synchronously and in commit
/// order for a given task.
pub trait TaskObserver: Send + Sync {
    fn on_update_task(&self, task: &Task);

    /// Called once per sweep period.
    fn timer_event(&self) {}
}
