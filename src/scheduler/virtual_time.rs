use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use tracing::trace;

use super::{Scheduler, Task, TaskHandle};
use crate::lock;

struct Entry {
    task: Task,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct VirtualClock {
    now: Duration,
    next_id: u64,
    // Ordered by due time, then by scheduling order.
    queue: BinaryHeap<Reverse<(Duration, u64)>>,
    tasks: HashMap<u64, Entry>,
}

/// Deterministic scheduler driven by a virtual clock.
///
/// Nothing runs until the clock is moved with [`advance_by`], [`advance_to`]
/// or [`flush`]. Due tasks then run on the calling thread, ordered by due time
/// and, for equal due times, by the order they were scheduled in. Tasks may
/// schedule further tasks while they run.
///
/// Clones share the same clock.
///
/// [`advance_by`]: VirtualTimeScheduler::advance_by
/// [`advance_to`]: VirtualTimeScheduler::advance_to
/// [`flush`]: VirtualTimeScheduler::flush
#[derive(Clone, Default)]
pub struct VirtualTimeScheduler {
    clock: Arc<Mutex<VirtualClock>>,
}

impl VirtualTimeScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `delta`, running every task that becomes due.
    pub fn advance_by(&self, delta: Duration) {
        let target = lock(&self.clock).now + delta;
        self.advance_to(target);
    }

    /// Moves the clock to `target`, running every task due at or before it.
    ///
    /// The clock never moves backwards; a `target` in the past runs nothing.
    pub fn advance_to(&self, target: Duration) {
        while let Some(entry) = self.pop_due(Some(target)) {
            Self::run(entry);
        }
        let mut clock = lock(&self.clock);
        if clock.now < target {
            clock.now = target;
        }
    }

    /// Runs queued tasks until the queue is empty, moving the clock to each
    /// task's due time.
    ///
    /// A periodic source that keeps rescheduling itself never lets the queue
    /// drain; use [`advance_by`](VirtualTimeScheduler::advance_by) for those.
    pub fn flush(&self) {
        while let Some(entry) = self.pop_due(None) {
            Self::run(entry);
        }
    }

    /// Number of scheduled tasks that have not run and were not cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.clock).tasks.len()
    }

    fn pop_due(&self, limit: Option<Duration>) -> Option<Entry> {
        let mut clock = lock(&self.clock);
        loop {
            let Reverse((due, id)) = *clock.queue.peek()?;
            if limit.is_some_and(|limit| due > limit) {
                return None;
            }
            clock.queue.pop();
            // Entries removed by cancellation leave a stale queue slot behind.
            if let Some(entry) = clock.tasks.remove(&id) {
                if clock.now < due {
                    clock.now = due;
                }
                trace!(?due, id, "virtual task due");
                return Some(entry);
            }
        }
    }

    fn run(entry: Entry) {
        if !entry.cancelled.load(Ordering::Acquire) {
            (entry.task)();
        }
    }
}

impl Scheduler for VirtualTimeScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let id = {
            let mut clock = lock(&self.clock);
            let id = clock.next_id;
            clock.next_id += 1;
            let due = clock.now + delay;
            clock.queue.push(Reverse((due, id)));
            clock.tasks.insert(
                id,
                Entry {
                    task,
                    cancelled: Arc::clone(&cancelled),
                },
            );
            id
        };

        let clock: Weak<Mutex<VirtualClock>> = Arc::downgrade(&self.clock);
        TaskHandle::new(cancelled).with_abort(move || {
            if let Some(clock) = clock.upgrade() {
                let removed = lock(&clock).tasks.remove(&id);
                // Dropped outside of the clock lock.
                drop(removed);
            }
        })
    }

    fn now(&self) -> Duration {
        lock(&self.clock).now
    }
}
