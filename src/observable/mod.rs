#![allow(clippy::needless_doctest_main)]
//! Cold observables, their factories and the operators that compose them.

use std::{
    error::Error,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

use tracing::{trace, warn};

use crate::{
    errors::{ObservableError, SharedError},
    lock,
    observer::Observer,
    subjects::BufSize,
    subscription::subscribe::{
        Subscribeable, Subscriber, Subscription, SubscriptionHandle,
    },
};

mod factory;
mod first;
pub mod multicast;
mod recovery;
mod retry_when;
mod switch;
mod timer;

pub use first::First;

use multicast::Connectable;

/// The `Observable` struct represents a source of values that can be observed
/// and transformed.
///
/// An `Observable` is cold: it holds a production procedure that runs again for
/// every subscription. Cloning an `Observable` is cheap and shares the procedure,
/// not any running production.
///
/// # Example: a cold countdown
///
/// The production procedure runs on every `subscribe`, so both subscribers see
/// the whole countdown. Nothing is left to release once it returns.
///
/// ```no_run
/// use rxcore::subscribe::{Subscriber, Subscription};
/// use rxcore::{Observable, Observer, Subscribeable};
///
/// let countdown = Observable::new(|mut o: Subscriber<u8>| {
///     for left in (1..=3).rev() {
///         o.next(left);
///     }
///     o.complete();
///     Subscription::empty()
/// });
///
/// countdown.subscribe_next(|v| println!("first: {}", v));
/// countdown.subscribe_with(
///     |v| println!("second: {}", v),
///     |e| eprintln!("second failed: {}", e),
///     || println!("second done"),
/// );
/// ```
///
/// # Example: polling a sensor on a thread
///
/// The producer checks `is_closed()` between readings, so unsubscribing
/// downstream stops the thread at its next check.
///
/// ```no_run
/// use std::time::Duration;
///
/// use rxcore::{
///     subscribe::{Subscription, SubscriptionHandle, UnsubscribeLogic, Unsubscribeable},
///     Observable, ObservableExt, Observer, Subscribeable,
/// };
///
/// let readings = Observable::new(|mut o| {
///     let sensor = std::thread::spawn(move || {
///         let mut celsius = 20.0_f32;
///         while !o.is_closed() {
///             o.next(celsius);
///             celsius += 0.25;
///             std::thread::sleep(Duration::from_millis(5));
///         }
///     });
///     Subscription::new(UnsubscribeLogic::Nil, SubscriptionHandle::JoinThread(sensor))
/// });
///
/// let subscription = readings
///     .map(|c| c * 9.0 / 5.0 + 32.0)
///     .subscribe_next(|f| println!("{:.1}F", f));
///
/// std::thread::sleep(Duration::from_millis(40));
/// subscription.unsubscribe();
/// ```
///
/// # Example: failing and recovering
///
/// Errors travel as `SharedError`. A panic inside the production procedure or
/// an operator closure arrives the same way, as `ObservableError::Producer`.
///
/// ```no_run
/// use rxcore::{Observable, ObservableExt, Subscribeable};
///
/// let parsed = Observable::from_iter(vec!["1", "2", "x", "4"])
///     .try_map(|s| s.parse::<i32>())
///     .catch(|e| {
///         eprintln!("bad input: {}", e);
///         Observable::of(0)
///     });
///
/// // Prints 1, 2, 0.
/// parsed.subscribe_next(|v| println!("{}", v));
/// ```
pub struct Observable<T> {
    subscribe_fn: Arc<dyn Fn(Subscriber<T>) -> Subscription + Send + Sync>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Observable {
            subscribe_fn: Arc::clone(&self.subscribe_fn),
        }
    }
}

impl<T: 'static> Observable<T> {
    /// Creates a new `Observable` with the provided subscribe function.
    ///
    /// The subscribe function (`sf`) runs once per subscription. It receives the
    /// `Subscriber` to deliver values to and returns a `Subscription` holding the
    /// teardown for whatever it started (threads, tasks, upstream subscriptions).
    /// The teardown runs exactly once: when the subscription is released or when
    /// the subscriber receives a terminal signal, whichever comes first.
    ///
    /// A panic raised by `sf` while it runs synchronously is delivered to the
    /// subscriber as an `ObservableError::Producer` error. Panics raised by the
    /// subscriber's own callbacks keep unwinding.
    pub fn new(sf: impl Fn(Subscriber<T>) -> Subscription + Send + Sync + 'static) -> Self {
        Observable {
            subscribe_fn: Arc::new(sf),
        }
    }

    /// Creates a new `Observable` from a fallible subscribe function.
    ///
    /// When `sf` returns `Err(e)`, `e` is delivered to the subscriber's `error`
    /// function.
    pub fn try_new<E>(
        sf: impl Fn(Subscriber<T>) -> Result<Subscription, E> + Send + Sync + 'static,
    ) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Observable::new(move |o| {
            let lifecycle = o.lifecycle();
            let o_shared = Arc::new(Mutex::new(o));
            match sf(forward(&o_shared).linked_to(&lifecycle)) {
                Ok(subscription) => subscription,
                Err(e) => {
                    lock(&o_shared).error(Arc::new(e));
                    Subscription::empty()
                }
            }
        })
    }

    /// Shares `source` behind an `Observable`.
    pub(crate) fn from_source<S>(source: S) -> Self
    where
        S: Subscribeable<ObsType = T> + Send + Sync + 'static,
    {
        Observable::new(move |o| source.subscribe(o))
    }
}

struct Delivery<T> {
    subscriber: Subscriber<T>,
    delivering: bool,
}

// Subscriber handed to the production procedure. Records when a call into the
// downstream subscriber is in progress so a panic can be attributed.
fn guarded<T: 'static>(delivery: &Arc<Mutex<Delivery<T>>>) -> Subscriber<T> {
    let dn = Arc::clone(delivery);
    let de = Arc::clone(delivery);
    let dc = Arc::clone(delivery);

    Subscriber::new(
        move |v| {
            let mut d = lock(&dn);
            d.delivering = true;
            d.subscriber.next(v);
            d.delivering = false;
        },
        move |e| {
            let mut d = lock(&de);
            d.delivering = true;
            d.subscriber.error(e);
            d.delivering = false;
        },
        move || {
            let mut d = lock(&dc);
            d.delivering = true;
            d.subscriber.complete();
            d.delivering = false;
        },
    )
}

impl<T: 'static> Subscribeable for Observable<T> {
    type ObsType = T;

    fn subscribe(&self, v: Subscriber<Self::ObsType>) -> Subscription {
        let lifecycle = v.lifecycle();
        let delivery = Arc::new(Mutex::new(Delivery {
            subscriber: v,
            delivering: false,
        }));
        let producer_side = guarded(&delivery).linked_to(&lifecycle);
        trace!("subscribe");

        match catch_unwind(AssertUnwindSafe(|| (self.subscribe_fn)(producer_side))) {
            Ok(mut teardown) => {
                let handle = teardown.take_handle();
                lifecycle.arm(teardown);
                Subscription::bound(lifecycle, handle)
            }
            Err(payload) => {
                let delivering = lock(&delivery).delivering;
                if delivering {
                    resume_unwind(payload);
                }
                let err = ObservableError::from_panic(payload);
                warn!(error = %err, "production procedure panicked");
                lock(&delivery).subscriber.error(err.shared());
                Subscription::bound(lifecycle, SubscriptionHandle::Nil)
            }
        }
    }
}

/// Subscriber forwarding every signal into `downstream`.
pub(crate) fn forward<T: 'static>(downstream: &Arc<Mutex<Subscriber<T>>>) -> Subscriber<T> {
    let on = Arc::clone(downstream);
    let oe = Arc::clone(downstream);
    let oc = Arc::clone(downstream);

    Subscriber::new(
        move |v| lock(&on).next(v),
        move |e| lock(&oe).error(e),
        move || lock(&oc).complete(),
    )
}

/// Routes a panic caught in user supplied operator code to `downstream`.
pub(crate) fn panicked<T>(
    downstream: &Arc<Mutex<Subscriber<T>>>,
    payload: Box<dyn std::any::Any + Send>,
) {
    let err = ObservableError::from_panic(payload);
    warn!(error = %err, "operator function panicked");
    lock(downstream).error(err.shared());
}

/// The `ObservableExt` trait provides a set of extension methods that can be applied
/// to observables to transform and manipulate their behavior.
///
/// This trait enhances the capabilities of the `Observable` struct by allowing users
/// to chain operators together, creating powerful reactive pipelines.
///
/// User functions passed to operators may panic; the panic is caught and sent
/// downstream as an `ObservableError::Producer` error.
pub trait ObservableExt<T: 'static>: Subscribeable<ObsType = T> {
    /// Transforms the items emitted by the observable using a transformation
    /// function.
    ///
    /// The transformation function `f` is applied to each item emitted by the
    /// observable, and the resulting value is emitted by the resulting observable.
    fn map<U, F>(self, f: F) -> Observable<U>
    where
        Self: Sized + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
        U: 'static,
    {
        let f = Arc::new(f);
        Observable::new(move |o| {
            let parent = o.lifecycle();
            let o_shared = Arc::new(Mutex::new(o));
            let o_cloned_e = Arc::clone(&o_shared);
            let o_cloned_c = Arc::clone(&o_shared);
            let f = Arc::clone(&f);

            let u = Subscriber::new(
                move |v| match catch_unwind(AssertUnwindSafe(|| f(v))) {
                    Ok(t) => lock(&o_shared).next(t),
                    Err(payload) => panicked(&o_shared, payload),
                },
                move |observable_error| lock(&o_cloned_e).error(observable_error),
                move || lock(&o_cloned_c).complete(),
            )
            .linked_to(&parent);
            self.subscribe(u)
        })
    }

    /// Like `map`, but the transformation can fail. An `Err` is sent downstream
    /// as the sequence error.
    fn try_map<U, E, F>(self, f: F) -> Observable<U>
    where
        Self: Sized + Send + Sync + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
        E: Error + Send + Sync + 'static,
        U: 'static,
    {
        let f = Arc::new(f);
        Observable::new(move |o| {
            let parent = o.lifecycle();
            let o_shared = Arc::new(Mutex::new(o));
            let o_cloned_e = Arc::clone(&o_shared);
            let o_cloned_c = Arc::clone(&o_shared);
            let f = Arc::clone(&f);

            let u = Subscriber::new(
                move |v| match catch_unwind(AssertUnwindSafe(|| f(v))) {
                    Ok(Ok(t)) => lock(&o_shared).next(t),
                    Ok(Err(e)) => lock(&o_shared).error(Arc::new(e)),
                    Err(payload) => panicked(&o_shared, payload),
                },
                move |observable_error| lock(&o_cloned_e).error(observable_error),
                move || lock(&o_cloned_c).complete(),
            )
            .linked_to(&parent);
            self.subscribe(u)
        })
    }

    /// Invokes `f` for every item before forwarding it unchanged.
    ///
    /// This is the `do` operator of other reactive libraries.
    fn tap<F>(self, f: F) -> Observable<T>
    where
        Self: Sized + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.try_tap(move |v| {
            f(v);
            Ok::<(), std::convert::Infallible>(())
        })
    }

    /// Like `tap`, but the side effect can fail. An `Err` is sent downstream as
    /// the sequence error and the item is not forwarded.
    fn try_tap<E, F>(self, f: F) -> Observable<T>
    where
        Self: Sized + Send + Sync + 'static,
        F: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
        E: Error + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Observable::new(move |o| {
            let parent = o.lifecycle();
            let o_shared = Arc::new(Mutex::new(o));
            let o_cloned_e = Arc::clone(&o_shared);
            let o_cloned_c = Arc::clone(&o_shared);
            let f = Arc::clone(&f);

            let u = Subscriber::new(
                move |v| match catch_unwind(AssertUnwindSafe(|| f(&v))) {
                    Ok(Ok(())) => lock(&o_shared).next(v),
                    Ok(Err(e)) => lock(&o_shared).error(Arc::new(e)),
                    Err(payload) => panicked(&o_shared, payload),
                },
                move |observable_error| lock(&o_cloned_e).error(observable_error),
                move || lock(&o_cloned_c).complete(),
            )
            .linked_to(&parent);
            self.subscribe(u)
        })
    }

    /// Recovers from an error by switching to the observable returned by `handler`.
    ///
    /// Values and completion pass through unchanged. When the source errors,
    /// `handler` receives the error and returns the fallback whose signals continue
    /// the sequence. To re-raise, return `Observable::throw_error(e)`.
    fn catch<F>(self, handler: F) -> Observable<T>
    where
        Self: Sized + Send + Sync + 'static,
        F: Fn(SharedError) -> Observable<T> + Send + Sync + 'static,
    {
        recovery::catch(self, handler)
    }

    /// Resubscribes to the source when it errors, making at most `max_attempts`
    /// subscriptions in total.
    ///
    /// When the last allowed attempt fails, the sequence errors with
    /// `ObservableError::RetryExhausted`, whose source is the last error.
    /// `retry(0)` retries without limit, like [`retry_forever`].
    ///
    /// [`retry_forever`]: ObservableExt::retry_forever
    fn retry(self, max_attempts: usize) -> Observable<T>
    where
        Self: Sized + Send + Sync + 'static,
    {
        if max_attempts == 0 {
            warn!("retry(0) resubscribes without limit");
            return recovery::retry(self, None);
        }
        recovery::retry(self, Some(max_attempts))
    }

    /// Resubscribes to the source every time it errors, without limit.
    fn retry_forever(self) -> Observable<T>
    where
        Self: Sized + Send + Sync + 'static,
    {
        warn!("unbounded retry requested");
        recovery::retry(self, None)
    }

    /// Resubscribes to the source when a retry signal says so.
    ///
    /// On the first error, `notifier` is called once with an observable of the
    /// source errors and returns the retry signal. Every value the signal emits
    /// while the current attempt has failed triggers a resubscription. If the
    /// signal errors, that error ends the sequence. If it completes, the sequence
    /// ends with the outcome of the current attempt.
    ///
    /// Timing comes from the signal, for example a `timer` built with an explicit
    /// scheduler.
    fn retry_when<U, F>(self, notifier: F) -> Observable<T>
    where
        Self: Sized + Send + Sync + 'static,
        F: Fn(Observable<SharedError>) -> Observable<U> + Send + Sync + 'static,
        U: 'static,
    {
        retry_when::retry_when(self, notifier)
    }

    /// Maps each item to an observable and mirrors the most recent one.
    ///
    /// Shorthand for `map(project).switch()`; see [`Observable::switch`].
    fn switch_map<U, F>(self, project: F) -> Observable<U>
    where
        Self: Sized + Send + Sync + 'static,
        F: Fn(T) -> Observable<U> + Send + Sync + 'static,
        U: 'static,
    {
        self.map(project).switch()
    }

    /// Multicasts the source through a `Connectable` that replays nothing.
    fn publish(self) -> Connectable<T>
    where
        Self: Sized + Send + Sync + 'static,
        T: Clone + Send,
    {
        Connectable::new(Observable::from_source(self), BufSize::Bounded(0))
    }

    /// Multicasts the source through a `Connectable` that replays the last
    /// `buffer_size` values to late subscribers.
    fn replay(self, buffer_size: usize) -> Connectable<T>
    where
        Self: Sized + Send + Sync + 'static,
        T: Clone + Send,
    {
        Connectable::new(Observable::from_source(self), BufSize::Bounded(buffer_size))
    }

    /// Like `replay`, with the capacity given as a [`BufSize`].
    ///
    /// `BufSize::default()` caps the history at
    /// [`DEFAULT_REPLAY_CAPACITY`](crate::subjects::DEFAULT_REPLAY_CAPACITY).
    fn replay_with(self, buf_size: BufSize) -> Connectable<T>
    where
        Self: Sized + Send + Sync + 'static,
        T: Clone + Send,
    {
        Connectable::new(Observable::from_source(self), buf_size)
    }

    /// Subscribes and resolves with the first emitted value.
    ///
    /// The subscription is released as soon as the value arrives, or when the
    /// returned future is dropped. An error resolves to that error; completing
    /// without a value resolves to `ObservableError::NoElements`.
    fn first(self) -> First<T>
    where
        Self: Sized,
        T: Send,
    {
        First::subscribe(&self)
    }
}

impl<O, T: 'static> ObservableExt<T> for O where O: Subscribeable<ObsType = T> {}
