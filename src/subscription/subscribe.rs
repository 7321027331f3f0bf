use std::{
    any::Any,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle as ThreadJoinHandle,
};

use tokio::runtime;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::{
    errors::{ObservableError, SharedError},
    lock,
    observer::Observer,
};

/// Anything an observer can attach to: observables, subject receivers and
/// connectables.
pub trait Subscribeable {
    /// Value type delivered through `next`.
    type ObsType;

    /// Attaches `s` and starts delivery.
    ///
    /// The returned `Subscription` releases the delivery channel when
    /// unsubscribed and can be used to await a thread or task producer.
    fn subscribe(&self, s: Subscriber<Self::ObsType>) -> Subscription;

    /// Subscribes with the three observer callbacks directly.
    fn subscribe_with(
        &self,
        next_fn: impl FnMut(Self::ObsType) + 'static + Send,
        error_fn: impl FnMut(SharedError) + 'static + Send,
        complete_fn: impl FnMut() + 'static + Send,
    ) -> Subscription
    where
        Self: Sized,
    {
        self.subscribe(Subscriber::new(next_fn, error_fn, complete_fn))
    }

    /// Subscribes with only a `next` callback. Errors are logged as unhandled.
    fn subscribe_next(&self, next_fn: impl FnMut(Self::ObsType) + 'static + Send) -> Subscription
    where
        Self: Sized,
    {
        self.subscribe(Subscriber::on_next(next_fn))
    }
}

/// Releasing side of a subscription.
pub trait Unsubscribeable {
    /// Cancels delivery and releases what the producer acquired.
    ///
    /// After this call no further signals are delivered to the observer that owns
    /// the subscription (signals already in flight may still land). Any teardown
    /// registered by the producer, such as a pending timer or an upstream
    /// subscription, runs exactly once.
    fn unsubscribe(self);
}

type NextFn<T> = Box<dyn FnMut(T) + Send>;
type CompleteFn = Box<dyn FnMut() + Send>;
type ErrorFn = Box<dyn FnMut(SharedError) + Send>;

enum Teardown {
    Pending,
    Armed(Subscription),
    Released,
}

/// Delivery state shared between a `Subscriber` and the `Subscription` that
/// controls it.
///
/// Holds the closed flag and the producer's teardown. The teardown is released
/// exactly once, on cancellation or on the first terminal signal. When the
/// subscriber terminates before the producer returned its teardown, the
/// teardown runs as soon as it is armed.
pub(crate) struct Lifecycle {
    closed: AtomicBool,
    parent: Option<Arc<Lifecycle>>,
    teardown: Mutex<Teardown>,
}

impl Lifecycle {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Lifecycle {
            closed: AtomicBool::new(false),
            parent: None,
            teardown: Mutex::new(Teardown::Pending),
        })
    }

    pub(crate) fn child_of(parent: &Arc<Lifecycle>) -> Arc<Self> {
        Arc::new(Lifecycle {
            closed: AtomicBool::new(false),
            parent: Some(Arc::clone(parent)),
            teardown: Mutex::new(Teardown::Pending),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.parent.as_ref().is_some_and(|p| p.is_closed())
    }

    pub(crate) fn arm(&self, teardown: Subscription) {
        let mut state = lock(&self.teardown);
        match *state {
            Teardown::Pending => *state = Teardown::Armed(teardown),
            Teardown::Released => {
                drop(state);
                teardown.unsubscribe();
            }
            Teardown::Armed(_) => {
                // A lifecycle belongs to exactly one subscribe call.
                drop(state);
                warn!("teardown armed twice; releasing the newer one");
                teardown.unsubscribe();
            }
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let previous = std::mem::replace(&mut *lock(&self.teardown), Teardown::Released);
        if let Teardown::Armed(teardown) = previous {
            teardown.unsubscribe();
        }
    }
}

/// Observer assembled from closures.
///
/// A `Subscriber` enforces the observer grammar: after `error` or `complete`,
/// or once its subscription is released, every further signal is ignored.
pub struct Subscriber<NextFnType> {
    next_fn: NextFn<NextFnType>,
    complete_fn: Option<CompleteFn>,
    error_fn: Option<ErrorFn>,
    stopped: bool,
    lifecycle: Arc<Lifecycle>,
}

impl<NextFnType> Subscriber<NextFnType> {
    /// Builds a subscriber from `next`, `error` and `complete` callbacks.
    pub fn new(
        next_fn: impl FnMut(NextFnType) + 'static + Send,
        error_fn: impl FnMut(SharedError) + 'static + Send,
        complete_fn: impl FnMut() + 'static + Send,
    ) -> Self {
        Subscriber {
            next_fn: Box::new(next_fn),
            complete_fn: Some(Box::new(complete_fn)),
            error_fn: Some(Box::new(error_fn)),
            stopped: false,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Builds a subscriber with only a `next` callback. A missing error callback
    /// means errors are logged as unhandled.
    pub fn on_next(next_fn: impl FnMut(NextFnType) + 'static + Send) -> Self {
        Subscriber {
            next_fn: Box::new(next_fn),
            complete_fn: None,
            error_fn: None,
            stopped: false,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Replaces the completion callback.
    pub fn on_complete(&mut self, complete_fn: impl FnMut() + 'static + Send) {
        self.complete_fn = Some(Box::new(complete_fn));
    }

    /// Replaces the error callback.
    pub fn on_error(&mut self, error_fn: impl FnMut(SharedError) + 'static + Send) {
        self.error_fn = Some(Box::new(error_fn));
    }

    /// Returns `true` once this subscriber stopped accepting signals, either
    /// because it received a terminal signal or because its subscription (or a
    /// downstream subscription it forwards to) was released.
    ///
    /// Long running producers should poll this and stop emitting.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stopped || self.lifecycle.is_closed()
    }

    /// Like `next`, but reports a rejected value to the producer instead of
    /// silently dropping it.
    ///
    /// # Errors
    ///
    /// Returns `ObservableError::SignalAfterTermination` when the subscriber is
    /// closed.
    pub fn try_next(&mut self, v: NextFnType) -> Result<(), ObservableError> {
        if self.is_closed() {
            return Err(ObservableError::SignalAfterTermination("next"));
        }
        (self.next_fn)(v);
        Ok(())
    }

    pub(crate) fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Makes this subscriber observe the closed state of `parent`, so that
    /// releasing the downstream also closes this upstream-facing subscriber.
    pub(crate) fn linked_to(mut self, parent: &Arc<Lifecycle>) -> Self {
        self.lifecycle = Lifecycle::child_of(parent);
        self
    }

    fn reject(&self, signal: &'static str) {
        trace!(error = %ObservableError::SignalAfterTermination(signal), "signal ignored");
    }
}

impl<T> Observer for Subscriber<T> {
    type NextFnType = T;

    fn next(&mut self, v: Self::NextFnType) {
        if self.is_closed() {
            self.reject("next");
            return;
        }
        (self.next_fn)(v);
    }

    fn complete(&mut self) {
        if self.is_closed() {
            self.reject("complete");
            return;
        }
        self.stopped = true;
        if let Some(cfn) = &mut self.complete_fn {
            (cfn)();
        }
        self.lifecycle.close();
    }

    fn error(&mut self, observable_error: SharedError) {
        if self.is_closed() {
            self.reject("error");
            return;
        }
        self.stopped = true;
        if let Some(efn) = &mut self.error_fn {
            (efn)(observable_error);
        } else {
            warn!(error = %observable_error, "unhandled observable error");
        }
        self.lifecycle.close();
    }
}

/// What a `Subscription` can wait on once its producer runs off the calling thread.
pub enum SubscriptionHandle {
    /// Producer is synchronous or not joinable.
    Nil,

    /// Producer runs in a Tokio task.
    JoinTask(JoinHandle<()>),

    /// Producer runs on an OS thread.
    JoinThread(ThreadJoinHandle<()>),
}

/// Handle returned by `subscribe`.
///
/// Dropping a `Subscription` does not unsubscribe; call `unsubscribe` to release
/// the delivery channel.
pub struct Subscription {
    pub(crate) unsubscribe_logic: UnsubscribeLogic,
    pub(crate) subscription_future: SubscriptionHandle,
    pub(crate) runtime_handle: Option<runtime::Handle>,
    lifecycle: Option<Arc<Lifecycle>>,
}

impl Subscription {
    /// Teardown a producer hands back from its subscribe function.
    ///
    /// `unsubscribe_logic` runs once, on cancellation or after the first terminal
    /// signal. `subscription_future` lets callers join a thread or task producer.
    /// The current Tokio runtime, if any, is captured to drive
    /// [`UnsubscribeLogic::Future`].
    #[must_use]
    pub fn new(
        unsubscribe_logic: UnsubscribeLogic,
        subscription_future: SubscriptionHandle,
    ) -> Self {
        Subscription {
            unsubscribe_logic,
            subscription_future,
            runtime_handle: runtime::Handle::try_current().ok(),
            lifecycle: None,
        }
    }

    /// A subscription with nothing to release and nothing to await.
    #[must_use]
    pub fn empty() -> Self {
        Subscription::new(UnsubscribeLogic::Nil, SubscriptionHandle::Nil)
    }

    /// Subscription controlling `lifecycle`: unsubscribing closes it and runs the
    /// teardown armed on it.
    pub(crate) fn bound(lifecycle: Arc<Lifecycle>, subscription_future: SubscriptionHandle) -> Self {
        let closer = Arc::clone(&lifecycle);
        let mut s = Subscription::new(
            UnsubscribeLogic::Logic(Box::new(move || closer.close())),
            subscription_future,
        );
        s.lifecycle = Some(lifecycle);
        s
    }

    /// Returns `true` when the delivery channel behind this subscription has
    /// ended, through cancellation or a terminal signal.
    ///
    /// Subscriptions built by hand with [`Subscription::new`] carry no delivery
    /// state and always report `false`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lifecycle.as_ref().is_some_and(|l| l.is_closed())
    }

    pub(crate) fn take_handle(&mut self) -> SubscriptionHandle {
        std::mem::replace(&mut self.subscription_future, SubscriptionHandle::Nil)
    }

    /// Waits for the producer's task or thread to finish.
    ///
    /// # Errors
    ///
    /// Returns the join error or panic payload of the producer.
    pub async fn join_concurrent(self) -> Result<(), Box<dyn Any + Send>> {
        match self.subscription_future {
            SubscriptionHandle::JoinTask(task_handle) => task_handle
                .await
                .map_err(|e| Box::new(e) as Box<dyn Any + Send>),
            SubscriptionHandle::JoinThread(thread_handle) => thread_handle.join(),
            SubscriptionHandle::Nil => Ok(()),
        }
    }

    /// Blocks until the OS thread associated with this subscription finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if joining the thread fails, or if the subscription is
    /// backed by a Tokio task (use `join_concurrent().await` for those).
    pub fn join(self) -> Result<(), Box<dyn Any + Send>> {
        match self.subscription_future {
            SubscriptionHandle::JoinThread(thread_handle) => thread_handle.join(),
            SubscriptionHandle::Nil => Ok(()),
            SubscriptionHandle::JoinTask(_) => Err(Box::new(ObservableError::Message(
                "subscription is backed by a Tokio task; use `join_concurrent().await`"
                    .to_string(),
            ))),
        }
    }
}

impl Unsubscribeable for Subscription {
    fn unsubscribe(self) {
        self.unsubscribe_logic.run(self.runtime_handle);
    }
}

/// Teardown run when a subscription is released.
pub enum UnsubscribeLogic {
    /// Nothing to release.
    Nil,

    /// Releases another subscription, typically an upstream one.
    Wrapped(Box<Subscription>),

    /// Runs a closure.
    Logic(Box<dyn FnOnce() + Send>),

    /// Spawns a future on the runtime captured at construction, or drives it
    /// on a private runtime when there was none.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

impl UnsubscribeLogic {
    fn run(self, runtime_handle: Option<runtime::Handle>) {
        match self {
            UnsubscribeLogic::Nil => (),
            UnsubscribeLogic::Logic(fnc) => fnc(),
            UnsubscribeLogic::Wrapped(subscription) => subscription.unsubscribe(),
            UnsubscribeLogic::Future(future) => match runtime_handle {
                Some(handle) => {
                    handle.spawn(future);
                }
                None => {
                    // Subscribed outside of a runtime: drive the future on a
                    // private current-thread runtime.
                    trace!("running async unsubscribe logic outside of Tokio");
                    std::thread::spawn(move || {
                        match runtime::Builder::new_current_thread().enable_all().build() {
                            Ok(rt) => rt.block_on(future),
                            Err(e) => warn!(error = %e, "failed to run async unsubscribe logic"),
                        }
                    });
                }
            },
        }
    }
}
