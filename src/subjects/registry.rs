use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
};

use tracing::trace;

use crate::{
    errors::SharedError,
    lock,
    subscription::subscribe::{Subscriber, Subscription, SubscriptionHandle, UnsubscribeLogic},
};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

pub(crate) type Slot<T> = Arc<Mutex<Subscriber<T>>>;

/// How a subject terminated. Replayed to every late subscriber.
#[derive(Clone)]
pub(crate) enum Terminal {
    Completed,
    Errored(SharedError),
}

impl Terminal {
    pub(crate) fn deliver<T>(&self, subscriber: &mut Subscriber<T>) {
        use crate::observer::Observer;

        match self {
            Terminal::Completed => subscriber.complete(),
            Terminal::Errored(e) => subscriber.error(Arc::clone(e)),
        }
    }
}

/// Observer list shared by all subject flavours.
///
/// Signals are delivered on a snapshot taken under the subject lock and sent
/// after the lock is released. Observers released while a delivery pass is
/// running are already closed, so they receive nothing more; their entries are
/// dropped when the last running pass ends.
pub(crate) struct Registry<T> {
    observers: Vec<(u64, Slot<T>)>,
    delivering: usize,
    pending_release: Vec<u64>,
    terminal: Option<Terminal>,
}

impl<T> Registry<T> {
    pub(crate) fn new() -> Self {
        Registry {
            observers: Vec::with_capacity(16),
            delivering: 0,
            pending_release: Vec::new(),
            terminal: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn terminal(&self) -> Option<&Terminal> {
        self.terminal.as_ref()
    }

    pub(crate) fn register(&mut self, slot: Slot<T>) -> u64 {
        let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
        self.observers.push((key, slot));
        trace!(key, observers = self.observers.len(), "observer registered");
        key
    }

    /// Marks the start of a delivery pass and returns the observers to feed.
    pub(crate) fn begin_pass(&mut self) -> Vec<Slot<T>> {
        self.delivering += 1;
        self.observers.iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    /// Records the terminal state and returns the observers that must receive
    /// it. Returns `None` when the registry already terminated.
    pub(crate) fn terminate(&mut self, terminal: Terminal) -> Option<Vec<Slot<T>>> {
        if self.terminal.is_some() {
            return None;
        }
        self.terminal = Some(terminal);
        Some(self.begin_pass())
    }

    fn end_pass(&mut self) {
        self.delivering = self.delivering.saturating_sub(1);
        if self.delivering == 0 {
            if !self.pending_release.is_empty() {
                let released = std::mem::take(&mut self.pending_release);
                self.observers.retain(|(k, _)| !released.contains(k));
            }
            if self.terminal.is_some() {
                self.observers.clear();
            }
        }
    }

    fn release(&mut self, key: u64) {
        if self.delivering > 0 {
            trace!(key, "observer release deferred until delivery ends");
            self.pending_release.push(key);
        } else {
            self.observers.retain(|(k, _)| *k != key);
            trace!(key, observers = self.observers.len(), "observer released");
        }
    }
}

/// Subject state that owns a [`Registry`].
pub(crate) trait Multicast<T>: Send + 'static {
    fn registry(&mut self) -> &mut Registry<T>;
}

/// Ends a delivery pass when dropped, even if an observer panicked.
pub(crate) struct DeliveryPass<'a, S: Multicast<T>, T> {
    state: &'a Mutex<S>,
    pub(crate) observers: Vec<Slot<T>>,
}

impl<'a, S: Multicast<T>, T> DeliveryPass<'a, S, T> {
    pub(crate) fn new(state: &'a Mutex<S>, observers: Vec<Slot<T>>) -> Self {
        DeliveryPass { state, observers }
    }
}

impl<S: Multicast<T>, T> Drop for DeliveryPass<'_, S, T> {
    fn drop(&mut self) {
        lock(self.state).registry().end_pass();
    }
}

/// Teardown removing `key` from the registry behind `state`.
///
/// Holds the state weakly: registered subscribers own their teardown, and the
/// registry owns the subscribers.
pub(crate) fn release_on_unsubscribe<S: Multicast<T>, T>(
    state: &Arc<Mutex<S>>,
    key: u64,
) -> Subscription {
    let state: Weak<Mutex<S>> = Arc::downgrade(state);
    Subscription::new(
        UnsubscribeLogic::Logic(Box::new(move || {
            if let Some(state) = state.upgrade() {
                lock(&state).registry().release(key);
            }
        })),
        SubscriptionHandle::Nil,
    )
}
