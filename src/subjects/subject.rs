use std::sync::{Arc, Mutex};

use tracing::trace;

use super::registry::{release_on_unsubscribe, DeliveryPass, Multicast, Registry, Terminal};
use crate::{
    errors::SharedError,
    lock,
    observer::Observer,
    subscription::subscribe::{Subscribeable, Subscriber, Subscription, SubscriptionHandle},
    Observable,
};

/// Hot multicast source: every value pushed into the emitter reaches each
/// observer registered at that moment. Nothing is buffered, so late observers
/// miss earlier values.
///
/// If the `Subject` terminated, new subscribers do not register; they receive the
/// terminal signal (completion or the error) right away.
///
/// You use the `Subject` type by invoking its `emitter_receiver` function to get a
/// [`SubjectEmitter`] for emitting values and a [`SubjectReceiver`] for subscribing
/// to emitted values.
///
/// # Examples
///
///```no_run
/// use rxcore::{subjects::Subject, subscribe::Subscriber};
/// use rxcore::{ObservableExt, Observer, Subscribeable};
///
/// let (mut emitter, receiver) = Subject::emitter_receiver();
///
/// receiver.subscribe(Subscriber::on_next(|v| println!("Subscriber #1 emitted: {}", v)));
///
/// emitter.next(101);
///
/// receiver
///     .clone() // Shallow clone: clones only the pointer to the `Subject`.
///     .map(|v| format!("mapped {}", v))
///     .subscribe_next(|v| println!("Subscriber #2 emitted: {}", v));
///
/// emitter.next(102); // Emitted to both subscribers.
/// emitter.complete();
///
/// emitter.next(103); // Called post-completion, does not emit.
///```
pub struct Subject<T> {
    registry: Registry<T>,
}

impl<T: Send + 'static> Multicast<T> for Subject<T> {
    fn registry(&mut self) -> &mut Registry<T> {
        &mut self.registry
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    /// Returns the emitting and the subscribing half of a fresh subject.
    #[must_use]
    pub fn emitter_receiver() -> (SubjectEmitter<T>, SubjectReceiver<T>) {
        let s = Arc::new(Mutex::new(Subject {
            registry: Registry::new(),
        }));

        (
            SubjectEmitter(Arc::clone(&s)),
            SubjectReceiver(Arc::clone(&s)),
        )
    }
}

/// Subscribing half of a [`Subject`]. Converts into an [`Observable`] to feed
/// operator chains.
pub struct SubjectReceiver<T>(Arc<Mutex<Subject<T>>>);

impl<T> Clone for SubjectReceiver<T> {
    fn clone(&self) -> Self {
        SubjectReceiver(Arc::clone(&self.0))
    }
}

/// Emitting half of a [`Subject`]. Implements [`Observer`] and converts into a
/// [`Subscriber`], so it can be subscribed to another observable.
///
/// [`Observer`]: crate::Observer
pub struct SubjectEmitter<T>(Arc<Mutex<Subject<T>>>);

impl<T> Clone for SubjectEmitter<T> {
    fn clone(&self) -> Self {
        SubjectEmitter(Arc::clone(&self.0))
    }
}

impl<T> SubjectReceiver<T> {
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
}

impl<T: Clone + Send + 'static> Subscribeable for SubjectReceiver<T> {
    type ObsType = T;

    fn subscribe(&self, mut v: Subscriber<Self::ObsType>) -> Subscription {
        let lifecycle = v.lifecycle();

        let mut state = lock(&self.0);
        if let Some(terminal) = state.registry.terminal().cloned() {
            drop(state);
            terminal.deliver(&mut v);
            return Subscription::bound(lifecycle, SubscriptionHandle::Nil);
        }
        let key = state.registry.register(Arc::new(Mutex::new(v)));
        drop(state);

        lifecycle.arm(release_on_unsubscribe(&self.0, key));
        Subscription::bound(lifecycle, SubscriptionHandle::Nil)
    }
}

impl<T: Clone + Send + 'static> Observer for SubjectEmitter<T> {
    type NextFnType = T;

    fn next(&mut self, v: Self::NextFnType) {
        let observers = {
            let mut state = lock(&self.0);
            if state.registry.terminal().is_some() {
                trace!("subject already terminated, value dropped");
                return;
            }
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

fn terminate<T: Send + 'static>(state: &Mutex<Subject<T>>, terminal: Terminal) {
    let Some(observers) = lock(state).registry.terminate(terminal.clone()) else {
        trace!("subject already terminated, terminal signal dropped");
        return;
    };
    let pass = DeliveryPass::new(state, observers);
    for o in &pass.observers {
        terminal.deliver(&mut *lock(o));
    }
}

impl<T: Clone + Send + 'static> From<SubjectEmitter<T>> for Subscriber<T> {
    fn from(value: SubjectEmitter<T>) -> Self {
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

impl<T: Clone + Send + 'static> From<SubjectReceiver<T>> for Observable<T> {
    fn from(value: SubjectReceiver<T>) -> Self {
        Observable::new(move |subscriber| value.subscribe(subscriber))
    }
}
