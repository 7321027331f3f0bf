//! `catch` and `retry`.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

use tracing::debug;

use crate::{
    errors::{ObservableError, SharedError},
    lock,
    observer::Observer,
    subscription::{
        serial::SerialSubscription,
        subscribe::{
            Lifecycle, Subscribeable, Subscriber, Subscription, SubscriptionHandle,
            UnsubscribeLogic,
        },
    },
};

use super::{forward, panicked, Observable};

fn release(serial: Arc<SerialSubscription>, handle: SubscriptionHandle) -> Subscription {
    Subscription::new(
        UnsubscribeLogic::Logic(Box::new(move || serial.unsubscribe())),
        handle,
    )
}

pub(super) fn catch<T, S, F>(source: S, handler: F) -> Observable<T>
where
    T: 'static,
    S: Subscribeable<ObsType = T> + Send + Sync + 'static,
    F: Fn(SharedError) -> Observable<T> + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    Observable::new(move |o| {
        let parent = o.lifecycle();
        let o_shared = Arc::new(Mutex::new(o));
        let o_cloned_e = Arc::clone(&o_shared);
        let o_cloned_c = Arc::clone(&o_shared);

        let serial = Arc::new(SerialSubscription::new());
        let serial_e = Arc::clone(&serial);
        let parent_e = Arc::clone(&parent);
        let handler = Arc::clone(&handler);

        let u = Subscriber::new(
            move |v| lock(&o_shared).next(v),
            move |observable_error: SharedError| {
                let fallback =
                    match catch_unwind(AssertUnwindSafe(|| handler(observable_error))) {
                        Ok(fallback) => fallback,
                        Err(payload) => return panicked(&o_cloned_e, payload),
                    };
                debug!("source failed, switching to fallback");
                let slot = serial_e.next_slot();
                let s = fallback.subscribe(forward(&o_cloned_e).linked_to(&parent_e));
                serial_e.set(slot, s);
            },
            move || lock(&o_cloned_c).complete(),
        )
        .linked_to(&parent);

        let slot = serial.next_slot();
        let mut s = source.subscribe(u);
        let handle = s.take_handle();
        serial.set(slot, s);
        release(serial, handle)
    })
}

// State of one subscription to a `retry` observable.
struct RetryRun<T, S> {
    source: Arc<S>,
    downstream: Arc<Mutex<Subscriber<T>>>,
    parent: Arc<Lifecycle>,
    serial: Arc<SerialSubscription>,
    limit: Option<usize>,
    attempts: Mutex<Attempts>,
}

struct Attempts {
    made: usize,
    subscribing: bool,
    pending: bool,
}

impl<T, S> RetryRun<T, S>
where
    T: 'static,
    S: Subscribeable<ObsType = T> + Send + Sync + 'static,
{
    // Subscribes to the source, looping instead of recursing when an attempt
    // fails while it is still being subscribed.
    fn attempt(this: &Arc<Self>) {
        {
            let mut attempts = lock(&this.attempts);
            if attempts.subscribing {
                attempts.pending = true;
                return;
            }
            attempts.subscribing = true;
        }

        loop {
            if this.serial.is_closed() || this.parent.is_closed() {
                lock(&this.attempts).subscribing = false;
                return;
            }
            let slot = this.serial.next_slot();
            let attempt = {
                let mut attempts = lock(&this.attempts);
                attempts.made += 1;
                attempts.pending = false;
                attempts.made
            };

            let s = this.source.subscribe(RetryRun::inner(this, slot, attempt));
            this.serial.set(slot, s);

            let mut attempts = lock(&this.attempts);
            if !attempts.pending {
                attempts.subscribing = false;
                return;
            }
        }
    }

    fn inner(this: &Arc<Self>, slot: u64, attempt: usize) -> Subscriber<T> {
        let run = Arc::clone(this);
        forward_values_and_completion(&this.downstream, move |observable_error| {
            if !run.serial.is_current(slot) {
                return;
            }
            match run.limit {
                Some(limit) if attempt >= limit => {
                    debug!(attempts = attempt, error = %observable_error, "retry attempts exhausted");
                    lock(&run.downstream).error(
                        ObservableError::RetryExhausted {
                            attempts: attempt,
                            source: observable_error,
                        }
                        .shared(),
                    );
                }
                _ => {
                    debug!(attempt, error = %observable_error, "source failed, resubscribing");
                    RetryRun::attempt(&run);
                }
            }
        })
        .linked_to(&this.parent)
    }
}

/// Subscriber forwarding `next` and `complete` into `downstream` and handing
/// errors to `on_error`.
pub(super) fn forward_values_and_completion<T: 'static>(
    downstream: &Arc<Mutex<Subscriber<T>>>,
    on_error: impl FnMut(SharedError) + Send + 'static,
) -> Subscriber<T> {
    let on = Arc::clone(downstream);
    let oc = Arc::clone(downstream);
    Subscriber::new(
        move |v| lock(&on).next(v),
        on_error,
        move || lock(&oc).complete(),
    )
}

pub(super) fn retry<T, S>(source: S, limit: Option<usize>) -> Observable<T>
where
    T: 'static,
    S: Subscribeable<ObsType = T> + Send + Sync + 'static,
{
    let source = Arc::new(source);
    Observable::new(move |o| {
        let run = Arc::new(RetryRun {
            source: Arc::clone(&source),
            parent: o.lifecycle(),
            downstream: Arc::new(Mutex::new(o)),
            serial: Arc::new(SerialSubscription::new()),
            limit,
            attempts: Mutex::new(Attempts {
                made: 0,
                subscribing: false,
                pending: false,
            }),
        });
        RetryRun::attempt(&run);
        release(Arc::clone(&run.serial), SubscriptionHandle::Nil)
    })
}
