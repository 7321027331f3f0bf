//! Schedulers decide where and when delayed work runs.
//!
//! Time based sources such as [`timer`] take a scheduler handle explicitly at
//! construction time. There is no ambient default scheduler.
//!
//! Three implementations ship with the crate:
//!
//! - [`TokioScheduler`] spawns every task on a Tokio runtime and waits with
//!   `tokio::time::sleep`.
//! - [`ThreadScheduler`] runs every task on its own OS thread, which is useful
//!   when no runtime is available.
//! - [`VirtualTimeScheduler`] keeps a virtual clock that only moves when told
//!   to, which makes time based tests deterministic.
//!
//! [`timer`]: crate::Observable::timer

mod thread_scheduler;
mod tokio_scheduler;
mod virtual_time;

pub use thread_scheduler::*;
pub use tokio_scheduler::*;
pub use virtual_time::*;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Work item accepted by a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs tasks after a delay.
pub trait Scheduler: Send + Sync + 'static {
    /// Schedules `task` to run once `delay` has elapsed.
    ///
    /// The returned handle cancels the task. A task cancelled before it started
    /// never runs.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Time elapsed since the scheduler was created, as seen by the scheduler.
    fn now(&self) -> Duration;
}

/// Cancellation handle for a scheduled task.
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<Box<dyn FnOnce() + Send>>,
}

impl TaskHandle {
    /// Creates a handle around a shared cancellation flag.
    ///
    /// Scheduler implementations check the flag right before running the task.
    #[must_use]
    pub fn new(cancelled: Arc<AtomicBool>) -> Self {
        TaskHandle {
            cancelled,
            abort: None,
        }
    }

    /// Adds an action that releases the scheduler resources held for the
    /// task (a spawned Tokio task, a sleeping thread, a queue entry).
    #[must_use]
    pub fn with_abort(mut self, abort: impl FnOnce() + Send + 'static) -> Self {
        self.abort = Some(Box::new(abort));
        self
    }

    /// Cancels the task.
    pub fn cancel(mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(abort) = self.abort.take() {
            abort();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        (**self).schedule(delay, task)
    }

    fn now(&self) -> Duration {
        (**self).now()
    }
}
