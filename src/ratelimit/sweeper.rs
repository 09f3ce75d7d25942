//! Background reclamation of idle per-identity state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::RateLimiter;

/// Handle to a running sweeper task. The task stops when the handle is
/// dropped or [`stop`](SweeperHandle::stop) is called.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper.
    pub fn stop(self) {
        // Drop aborts the task.
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Shortest interval a sweeper will run at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn a task that calls [`RateLimiter::sweep`] every `interval`.
///
/// Intervals shorter than [`MIN_SWEEP_INTERVAL`], including zero, are raised
/// to it. Must be called from within a tokio runtime.
pub fn spawn_sweeper(limiter: Arc<dyn RateLimiter>, interval: Duration) -> SweeperHandle {
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    info!(
        algorithm = %limiter.algorithm(),
        interval_ms = interval.as_millis() as u64,
        "Starting state sweeper"
    );

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // discard the first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = limiter.sweep();
            debug!(
                evicted,
                tracked = limiter.tracked_identities(),
                "Sweeper pass complete"
            );
        }
    });

    SweeperHandle { task }
}
