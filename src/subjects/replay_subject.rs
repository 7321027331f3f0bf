use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tracing::{trace, warn};

use super::registry::{release_on_unsubscribe, DeliveryPass, Multicast, Registry, Terminal};
use crate::{
    errors::SharedError,
    lock,
    observer::Observer,
    subscription::subscribe::{Subscribeable, Subscriber, Subscription, SubscriptionHandle},
    Observable,
};

/// Replay capacity used by `BufSize::default()`.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1024;

/// Specifies the buffer size for replaying previous emissions in `ReplaySubject`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufSize {
    /// Keeps every emitted value. Memory grows with the stream, so this is an
    /// explicit opt-in and is logged when a buffer is created with it.
    Unbounded,

    /// Keeps at most this many of the most recent values.
    /// `Bounded(0)` replays nothing.
    Bounded(usize),
}

impl Default for BufSize {
    fn default() -> Self {
        BufSize::Bounded(DEFAULT_REPLAY_CAPACITY)
    }
}

/// The most recent values of a stream, oldest first.
pub struct ReplayBuffer<T> {
    values: VecDeque<T>,
    capacity: Option<usize>,
}

impl<T> ReplayBuffer<T> {
    #[must_use]
    pub fn new(size: BufSize) -> Self {
        let capacity = match size {
            BufSize::Bounded(n) => Some(n),
            BufSize::Unbounded => {
                warn!("replay buffer created without a capacity limit");
                None
            }
        };
        ReplayBuffer {
            values: VecDeque::with_capacity(capacity.unwrap_or(16).min(64)),
            capacity,
        }
    }

    /// Appends `v`, evicting the oldest value when the buffer is full.
    pub fn push(&mut self, v: T) {
        match self.capacity {
            Some(0) => (),
            Some(n) => {
                if self.values.len() == n {
                    self.values.pop_front();
                }
                self.values.push_back(v);
            }
            None => self.values.push_back(v),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum number of values kept, `None` when unbounded.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

/// Subject with a history window.
///
/// Each new subscriber first gets the buffered values, synchronously and in the
/// order they were emitted, then live values. After the subject terminated, late
/// subscribers get the history followed by the stored completion or error.
///
/// Registration and replay are serialized against the emitter: a value emitted
/// while a subscriber is being registered is either part of its replay or
/// delivered live after the replay, never both and never before it.
///
/// # Examples
///
///```no_run
/// use rxcore::{
///     subjects::{BufSize, ReplaySubject},
///     subscribe::Subscriber,
/// };
/// use rxcore::{Observer, Subscribeable};
///
/// let (mut emitter, receiver) = ReplaySubject::emitter_receiver(BufSize::Bounded(2));
///
/// emitter.next(101);
/// emitter.next(102);
/// emitter.next(103);
///
/// // Receives 102 and 103 immediately, then 104.
/// receiver.subscribe(Subscriber::on_next(|v| println!("Emitted {}", v)));
///
/// emitter.next(104);
/// emitter.complete();
///
/// // Receives 103 and 104, then completes.
/// receiver.subscribe(Subscriber::new(
///     |v| println!("Late {}", v),
///     |e| eprintln!("{}", e),
///     || println!("Completed"),
/// ));
///```
pub struct ReplaySubject<T> {
    registry: Registry<T>,
    buffer: ReplayBuffer<T>,
}

impl<T: Send + 'static> Multicast<T> for ReplaySubject<T> {
    fn registry(&mut self) -> &mut Registry<T> {
        &mut self.registry
    }
}

impl<T: Clone + Send + 'static> ReplaySubject<T> {
    /// Creates a new pair of `ReplaySubjectEmitter` for emitting values and
    /// `ReplaySubjectReceiver` for subscribing to values.
    ///
    /// `buf_size` bounds how many of the most recent values are replayed.
    #[must_use]
    pub fn emitter_receiver(
        buf_size: BufSize,
    ) -> (ReplaySubjectEmitter<T>, ReplaySubjectReceiver<T>) {
        let s = Arc::new(Mutex::new(ReplaySubject {
            registry: Registry::new(),
            buffer: ReplayBuffer::new(buf_size),
        }));

        (
            ReplaySubjectEmitter(Arc::clone(&s)),
            ReplaySubjectReceiver(Arc::clone(&s)),
        )
    }
}

/// Subscribing half of a [`ReplaySubject`].
pub struct ReplaySubjectReceiver<T>(Arc<Mutex<ReplaySubject<T>>>);

impl<T> Clone for ReplaySubjectReceiver<T> {
    fn clone(&self) -> Self {
        ReplaySubjectReceiver(Arc::clone(&self.0))
    }
}

/// Emitting half of a [`ReplaySubject`]. Every value is recorded in the history
/// window before it is fanned out.
pub struct ReplaySubjectEmitter<T>(Arc<Mutex<ReplaySubject<T>>>);

impl<T> Clone for ReplaySubjectEmitter<T> {
    fn clone(&self) -> Self {
        ReplaySubjectEmitter(Arc::clone(&self.0))
    }
}

impl<T> ReplaySubjectReceiver<T> {
    /// Number of observers currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.0).registry.len()
    }

    /// `true` when nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of values currently held for replay.
    #[must_use]
    pub fn buffered(&self) -> usize {
        lock(&self.0).buffer.len()
    }
}

impl<T: Clone + Send + 'static> Subscribeable for ReplaySubjectReceiver<T> {
    type ObsType = T;

    fn subscribe(&self, v: Subscriber<Self::ObsType>) -> Subscription {
        let lifecycle = v.lifecycle();
        let slot = Arc::new(Mutex::new(v));

        let mut state = lock(&self.0);
        let history: Vec<T> = state.buffer.iter().cloned().collect();
        let terminal = state.registry.terminal().cloned();
        let key = match terminal {
            Some(_) => None,
            None => Some(state.registry.register(Arc::clone(&slot))),
        };
        // Taken before the subject lock is released so that live values
        // emitted from now on queue up behind the replay.
        let mut subscriber = lock(&slot);
        drop(state);

        trace!(replayed = history.len(), "replaying buffered values");
        for value in history {
            subscriber.next(value);
        }
        if let Some(terminal) = terminal {
            terminal.deliver(&mut *subscriber);
        }
        drop(subscriber);

        if let Some(key) = key {
            lifecycle.arm(release_on_unsubscribe(&self.0, key));
        }
        Subscription::bound(lifecycle, SubscriptionHandle::Nil)
    }
}

impl<T: Clone + Send + 'static> Observer for ReplaySubjectEmitter<T> {
    type NextFnType = T;

    fn next(&mut self, v: Self::NextFnType) {
        let observers = {
            let mut state = lock(&self.0);
            if state.registry.terminal().is_some() {
                trace!("replay subject already terminated, value dropped");
                return;
            }
            state.buffer.push(v.clone());
            state.registry.begin_pass()
        };
        let pass = DeliveryPass::new(&*self.0, observers);
        for o in &pass.observers {
            lock(o).next(v.clone());
        }
    }

    fn error(&mut self, e: SharedError) {
        terminate(&self.0, Terminal::Errored(e));
    }

    fn complete(&mut self) {
        terminate(&self.0, Terminal::Completed);
    }
}

fn terminate<T: Send + 'static>(state: &Mutex<ReplaySubject<T>>, terminal: Terminal) {
    let Some(observers) = lock(state).registry.terminate(terminal.clone()) else {
        trace!("replay subject already terminated, terminal signal dropped");
        return;
    };
    let pass = DeliveryPass::new(state, observers);
    for o in &pass.observers {
        terminal.deliver(&mut *lock(o));
    }
}

impl<T: Clone + Send + 'static> From<ReplaySubjectEmitter<T>> for Subscriber<T> {
    fn from(value: ReplaySubjectEmitter<T>) -> Self {
        let mut vn = value.clone();
        let mut ve = value.clone();
        let mut vc = value;
        Subscriber::new(
            move |v| {
                vn.next(v);
            },
            move |e| ve.error(e),
            move || vc.complete(),
        )
    }
}

impl<T: Clone + Send + 'static> From<ReplaySubjectReceiver<T>> for Observable<T> {
    fn from(value: ReplaySubjectReceiver<T>) -> Self {
        Observable::new(move |subscriber| value.subscribe(subscriber))
    }
}
