use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    time::{Duration, Instant},
};

use tracing::trace;

use super::{Scheduler, Task, TaskHandle};

/// Runs every task on a dedicated OS thread.
///
/// The thread waits on a channel with a timeout, so cancelling wakes it up
/// immediately instead of leaving it asleep until the deadline.
#[derive(Clone, Debug)]
pub struct ThreadScheduler {
    origin: Instant,
}

impl ThreadScheduler {
    #[must_use]
    pub fn new() -> Self {
        ThreadScheduler {
            origin: Instant::now(),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_c = Arc::clone(&cancelled);
        let (tx, rx) = mpsc::channel::<()>();
        let deadline = Instant::now() + delay;

        std::thread::spawn(move || {
            match rx.recv_timeout(delay) {
                Ok(()) => return,
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => {
                    // Handle dropped without cancelling; the task still runs.
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                }
            }
            if !cancelled_c.load(Ordering::Acquire) {
                task();
            }
        });
        trace!(?delay, "task scheduled on a new thread");

        TaskHandle::new(cancelled).with_abort(move || {
            let _ = tx.send(());
        })
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

#[cfg(test)]
mod test {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn runs_task_on_its_own_thread() {
        let (tx, rx) = mpsc::channel();
        let caller = std::thread::current().id();

        let _handle = ThreadScheduler::new().schedule(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send(std::thread::current().id());
            }),
        );

        let worker = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_ne!(worker, caller);
    }

    #[test]
    fn cancel_wakes_and_skips_task() {
        let (tx, rx) = mpsc::channel::<()>();
        let handle = ThreadScheduler::new().schedule(
            Duration::from_millis(200),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        assert!(!handle.is_cancelled());
        handle.cancel();

        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    }

    #[test]
    fn dropped_handle_still_runs_task() {
        let (tx, rx) = mpsc::channel::<()>();
        drop(ThreadScheduler::new().schedule(
            Duration::from_millis(20),
            Box::new(move || {
                let _ = tx.send(());
            }),
        ));

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
