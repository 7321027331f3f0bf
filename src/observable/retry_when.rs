use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

use tracing::debug;

use crate::{
    errors::SharedError,
    lock,
    observer::Observer,
    subjects::{Subject, SubjectEmitter, SubjectReceiver},
    subscription::{
        serial::SerialSubscription,
        subscribe::{
            Lifecycle, Subscribeable, Subscriber, Subscription, SubscriptionHandle,
            UnsubscribeLogic,
        },
    },
};

use super::{panicked, recovery::forward_values_and_completion, Observable};

struct Progress {
    // Error of the current attempt, once it failed and no retry was requested.
    failed: Option<SharedError>,
    errors: Option<SubjectEmitter<SharedError>>,
    // Errors waiting to be pushed to the notifier, and whether a push is running.
    queued: VecDeque<SharedError>,
    emitting: bool,
    signal_done: bool,
    subscribing: bool,
    pending: bool,
}

// State of one subscription to a `retry_when` observable.
struct RetryWhenRun<T, S, F> {
    source: Arc<S>,
    notifier: Arc<F>,
    downstream: Arc<Mutex<Subscriber<T>>>,
    parent: Arc<Lifecycle>,
    attempt: SerialSubscription,
    signal: SerialSubscription,
    progress: Mutex<Progress>,
}

impl<T, S, F, U> RetryWhenRun<T, S, F>
where
    T: 'static,
    U: 'static,
    S: Subscribeable<ObsType = T> + Send + Sync + 'static,
    F: Fn(Observable<SharedError>) -> Observable<U> + Send + Sync + 'static,
{
    fn closed(&self) -> bool {
        self.attempt.is_closed() || self.parent.is_closed()
    }

    fn resubscribe(this: &Arc<Self>) {
        {
            let mut progress = lock(&this.progress);
            if progress.subscribing {
                progress.pending = true;
                return;
            }
            progress.subscribing = true;
        }

        loop {
            if this.closed() {
                lock(&this.progress).subscribing = false;
                return;
            }
            let slot = this.attempt.next_slot();
            lock(&this.progress).pending = false;

            let run = Arc::clone(this);
            let inner = forward_values_and_completion(&this.downstream, move |e| {
                if run.attempt.is_current(slot) {
                    RetryWhenRun::attempt_failed(&run, e);
                }
            })
            .linked_to(&this.parent);
            let s = this.source.subscribe(inner);
            this.attempt.set(slot, s);

            let mut progress = lock(&this.progress);
            if !progress.pending {
                progress.subscribing = false;
                return;
            }
        }
    }

    fn attempt_failed(this: &Arc<Self>, e: SharedError) {
        let (receiver, signal_done, errors) = {
            let mut progress = lock(&this.progress);
            progress.failed = Some(Arc::clone(&e));
            let receiver = if progress.errors.is_none() {
                let (emitter, receiver) = Subject::emitter_receiver();
                progress.errors = Some(emitter);
                Some(receiver)
            } else {
                None
            };
            (receiver, progress.signal_done, progress.errors.clone())
        };

        if signal_done {
            debug!(error = %e, "retry signal already completed, giving up");
            lock(&this.downstream).error(e);
            return;
        }
        let Some(mut errors) = errors else {
            return;
        };
        if let Some(receiver) = receiver {
            if !RetryWhenRun::subscribe_signal(this, receiver) {
                return;
            }
        }

        {
            let mut progress = lock(&this.progress);
            progress.queued.push_back(e);
            // A resubscription that failed while the notifier was handling the
            // previous error; the running push delivers this one next.
            if progress.emitting {
                return;
            }
            progress.emitting = true;
        }
        loop {
            let next = {
                let mut progress = lock(&this.progress);
                match progress.queued.pop_front() {
                    Some(next) => next,
                    None => {
                        progress.emitting = false;
                        return;
                    }
                }
            };
            errors.next(next);
        }
    }

    // Builds the retry signal from the notifier. Returns `false` when the
    // notifier panicked and the sequence already ended.
    fn subscribe_signal(this: &Arc<Self>, errors: SubjectReceiver<SharedError>) -> bool {
        let receiver: Observable<SharedError> = errors.into();
        let notifier = Arc::clone(&this.notifier);
        let signal = match catch_unwind(AssertUnwindSafe(|| notifier(receiver))) {
            Ok(signal) => signal,
            Err(payload) => {
                panicked(&this.downstream, payload);
                return false;
            }
        };

        let (rn, rc) = (Arc::clone(this), Arc::clone(this));
        let re = Arc::clone(&this.downstream);
        let watcher = Subscriber::new(
            move |_| {
                let retry = lock(&rn.progress).failed.take().is_some();
                if retry {
                    debug!("retry signal fired, resubscribing");
                    RetryWhenRun::resubscribe(&rn);
                }
            },
            move |e| {
                debug!(error = %e, "retry signal failed");
                lock(&re).error(e);
            },
            move || {
                let failed = {
                    let mut progress = lock(&rc.progress);
                    progress.signal_done = true;
                    progress.failed.take()
                };
                debug!("retry signal completed");
                if let Some(e) = failed {
                    lock(&rc.downstream).error(e);
                }
            },
        )
        .linked_to(&this.parent);

        let slot = this.signal.next_slot();
        let s = signal.subscribe(watcher);
        this.signal.set(slot, s);
        true
    }
}

pub(super) fn retry_when<T, S, F, U>(source: S, notifier: F) -> Observable<T>
where
    T: 'static,
    U: 'static,
    S: Subscribeable<ObsType = T> + Send + Sync + 'static,
    F: Fn(Observable<SharedError>) -> Observable<U> + Send + Sync + 'static,
{
    let source = Arc::new(source);
    let notifier = Arc::new(notifier);
    Observable::new(move |o| {
        let run = Arc::new(RetryWhenRun {
            source: Arc::clone(&source),
            notifier: Arc::clone(&notifier),
            parent: o.lifecycle(),
            downstream: Arc::new(Mutex::new(o)),
            attempt: SerialSubscription::new(),
            signal: SerialSubscription::new(),
            progress: Mutex::new(Progress {
                failed: None,
                errors: None,
                queued: VecDeque::new(),
                emitting: false,
                signal_done: false,
                subscribing: false,
                pending: false,
            }),
        });
        RetryWhenRun::resubscribe(&run);

        Subscription::new(
            UnsubscribeLogic::Logic(Box::new(move || {
                run.attempt.unsubscribe();
                run.signal.unsubscribe();
            })),
            SubscriptionHandle::Nil,
        )
    })
}
