//! Delayed task execution for the lifecycle engine.
//!
//! Every task runs on the tokio runtime behind a [`TaskTracker`] so that an
//! owning component can shut the scheduler down and wait for it. Each task
//! carries a generation number in a task-local so it can tell its own handle
//! apart from a predecessor it replaces.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

tokio::task_local! {
    static TASK_GENERATION: u64;
}

/// Generation of the scheduled task currently running, if any.
pub fn current_generation() -> Option<u64> {
    TASK_GENERATION.try_with(|generation| *generation).ok()
}

/// Handle to a submitted task.
#[derive(Debug)]
pub struct ScheduledTask {
    generation: u64,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Generation this task was scheduled with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True once the task ran or was aborted.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Returns true when called from inside this task.
    pub fn is_current(&self) -> bool {
        current_generation() == Some(self.generation)
    }

    /// Aborts the task at its next suspension point. A task never aborts itself.
    pub fn cancel(&self) {
        if !self.is_current() && !self.handle.is_finished() {
            self.handle.abort();
        }
    }
}

/// Runs delayed tasks on a tokio runtime.
pub struct TaskScheduler {
    runtime: Handle,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    next_generation: AtomicU64,
}

impl TaskScheduler {
    /// Creates a scheduler spawning onto `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Creates a scheduler on the runtime of the calling context.
    ///
    /// Panics outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Runs `task` after `delay`.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let shutdown = self.shutdown.clone();
        let body = TASK_GENERATION.scope(generation, async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(generation, "scheduled task dropped by shutdown");
                }
                _ = async {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    task.await;
                } => {}
            }
        });
        let handle = self.tracker.spawn_on(body, &self.runtime);
        ScheduledTask { generation, handle }
    }

    /// Number of tasks not yet finished.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// True once `shutdown` ran.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancels every task and waits up to `grace` for them to wind down.
    /// Returns false if some were still running when the grace period ended.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        self.tracker.close();
        tokio::time::timeout(grace, self.tracker.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_respected() {
        let scheduler = TaskScheduler::current();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = scheduler.schedule(Duration::from_secs(10), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!ran.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(ran.load(Ordering::SeqCst));
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_run() {
        let scheduler = TaskScheduler::current();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = scheduler.schedule(Duration::from_secs(10), async move {
            flag.store(true, Ordering::SeqCst);
        });
        task.cancel();
        task.cancel();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_sees_its_generation() {
        let scheduler = TaskScheduler::current();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let task = scheduler.schedule(Duration::ZERO, async move {
            let _ = tx.send(current_generation());
        });
        assert_eq!(rx.await.unwrap(), Some(task.generation()));
        assert_eq!(current_generation(), None);
        assert!(!task.is_current());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_tasks() {
        let scheduler = TaskScheduler::current();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        scheduler.schedule(Duration::from_secs(600), async move {
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(scheduler.active_tasks(), 1);
        assert!(scheduler.shutdown(Duration::from_secs(1)).await);
        assert!(scheduler.is_shutdown());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(scheduler.active_tasks(), 0);
    }
}
