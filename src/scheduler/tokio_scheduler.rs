use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{runtime, time::Instant};
use tracing::trace;

use super::{Scheduler, Task, TaskHandle};

/// Runs tasks on a Tokio runtime.
///
/// Every scheduled task becomes a spawned Tokio task that sleeps for the
/// requested delay. Cancelling aborts the spawned task.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    handle: runtime::Handle,
    origin: Instant,
}

impl TokioScheduler {
    /// Scheduler bound to the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime, like
    /// `tokio::runtime::Handle::current`.
    #[must_use]
    pub fn current() -> Self {
        Self::from_handle(runtime::Handle::current())
    }

    /// Scheduler bound to an explicit runtime handle.
    #[must_use]
    pub fn from_handle(handle: runtime::Handle) -> Self {
        // `Instant::now` reads the runtime clock, which may be paused in tests.
        let _guard = handle.enter();
        TokioScheduler {
            handle,
            origin: Instant::now(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_c = Arc::clone(&cancelled);

        let join_handle = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !cancelled_c.load(Ordering::Acquire) {
                task();
            }
        });
        trace!(?delay, "task scheduled on tokio");

        TaskHandle::new(cancelled).with_abort(move || join_handle.abort())
    }

    fn now(&self) -> Duration {
        let _guard = self.handle.enter();
        self.origin.elapsed()
    }
}
