//! `Connectable`: one shared subscription to a source, fanned out to many
//! subscribers.
//!
//! Subscribing to a cold observable twice runs its production twice: two
//! subscribers to a timer get two independent timers. A `Connectable` starts the
//! source once, on `connect()`, and fans its values out. Late subscribers get the
//! replayed history first, bounded by the capacity chosen with `publish`,
//! `replay` or `replay_with`.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::{
    lock,
    subjects::{BufSize, ReplaySubject, ReplaySubjectEmitter, ReplaySubjectReceiver},
    subscription::subscribe::{
        Subscribeable, Subscriber, Subscription, SubscriptionHandle, UnsubscribeLogic,
        Unsubscribeable,
    },
    Observable,
};

#[derive(Default)]
struct Connection {
    generation: u64,
    active: Option<u64>,
    subscription: Option<Subscription>,
}

/// Hot view of a cold source, started explicitly with `connect()`.
///
/// Nothing is emitted before `connect()`. Subscribers registered before `connect()`
/// receive every value produced after it. Subscribers registered later first
/// receive the buffered history, synchronously and in order, then live values.
/// Completion or an error of the source reaches every current subscriber and is
/// replayed to every later one.
///
/// Clones share the same connection and subscriber group.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use rxcore::{scheduler::TokioScheduler, Observable, ObservableExt, Subscribeable};
///
/// #[tokio::main]
/// async fn main() {
///     let ticks = Observable::timer(
///         Duration::from_millis(100),
///         Some(Duration::from_millis(100)),
///         TokioScheduler::current(),
///     )
///     .replay(3);
///
///     let connection = ticks.connect();
///     tokio::time::sleep(Duration::from_millis(550)).await;
///
///     // Receives 2, 3, 4 right away, then live ticks from the same timer.
///     ticks.subscribe_next(|v| println!("late subscriber: {}", v));
///     tokio::time::sleep(Duration::from_millis(300)).await;
///
///     rxcore::Unsubscribeable::unsubscribe(connection);
/// }
/// ```
pub struct Connectable<T> {
    source: Observable<T>,
    emitter: ReplaySubjectEmitter<T>,
    receiver: ReplaySubjectReceiver<T>,
    connection: Arc<Mutex<Connection>>,
}

impl<T> Clone for Connectable<T> {
    fn clone(&self) -> Self {
        Connectable {
            source: self.source.clone(),
            emitter: self.emitter.clone(),
            receiver: self.receiver.clone(),
            connection: Arc::clone(&self.connection),
        }
    }
}

impl<T: Clone + Send + 'static> Connectable<T> {
    /// Wraps `source` with a replay window of `buf_size`.
    ///
    /// Typically, you will not use this method directly. The [`publish()`],
    /// [`replay()`] and [`replay_with()`] operators create `Connectable`
    /// observables more conveniently.
    ///
    /// [`publish()`]: crate::ObservableExt::publish
    /// [`replay()`]: crate::ObservableExt::replay
    /// [`replay_with()`]: crate::ObservableExt::replay_with
    #[must_use]
    pub fn new(source: Observable<T>, buf_size: BufSize) -> Self {
        let (emitter, receiver) = ReplaySubject::emitter_receiver(buf_size);
        Connectable {
            source,
            emitter,
            receiver,
            connection: Arc::new(Mutex::new(Connection::default())),
        }
    }

    /// Connects the `Connectable` observable, subscribing the shared subscriber
    /// group to the source.
    ///
    /// While a connection is live, further calls do not subscribe again and
    /// return a handle to the same connection. Unsubscribing the returned handle
    /// disconnects the source; a later `connect()` subscribes it again into the
    /// same subscriber group.
    #[must_use]
    pub fn connect(&self) -> Subscription {
        let generation = {
            let mut conn = lock(&self.connection);
            if let Some(generation) = conn.active {
                debug!(generation, "already connected");
                return self.disconnect_handle(generation, SubscriptionHandle::Nil);
            }
            conn.generation += 1;
            conn.active = Some(conn.generation);
            conn.generation
        };
        debug!(generation, "connecting to source");

        // Turn the emitter into a `Subscriber` and subscribe it to the source. This
        // feeds every subscriber registered with the replay subject.
        let mut subscription = self.source.subscribe(self.emitter.clone().into());
        let subscription_future = subscription.take_handle();

        let mut conn = lock(&self.connection);
        if conn.active == Some(generation) {
            conn.subscription = Some(subscription);
        } else {
            // Disconnected while the source was being subscribed.
            drop(conn);
            subscription.unsubscribe();
        }

        self.disconnect_handle(generation, subscription_future)
    }

    fn disconnect_handle(
        &self,
        generation: u64,
        subscription_future: SubscriptionHandle,
    ) -> Subscription {
        let connection = Arc::clone(&self.connection);
        Subscription::new(
            UnsubscribeLogic::Logic(Box::new(move || {
                let subscription = {
                    let mut conn = lock(&connection);
                    if conn.active != Some(generation) {
                        return;
                    }
                    conn.active = None;
                    conn.subscription.take()
                };
                debug!(generation, "disconnecting from source");
                if let Some(subscription) = subscription {
                    subscription.unsubscribe();
                }
            })),
            subscription_future,
        )
    }

    /// Returns `true` while a connection is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.connection).active.is_some()
    }
}

impl<T: Clone + Send + 'static> Subscribeable for Connectable<T> {
    type ObsType = T;

    fn subscribe(&self, v: Subscriber<Self::ObsType>) -> Subscription {
        self.receiver.subscribe(v)
    }
}

impl<T: Clone + Send + 'static> From<Connectable<T>> for Observable<T> {
    fn from(value: Connectable<T>) -> Self {
        Observable::new(move |subscriber| value.subscribe(subscriber))
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use crate::{
        observable::{Observable, ObservableExt},
        subscription::subscribe::{Subscribeable, Subscriber, Subscription, Unsubscribeable},
    };

    #[test]
    fn connect_is_idempotent_while_connected() {
        let runs = Arc::new(Mutex::new(0));
        let runs_c = Arc::clone(&runs);
        let source = Observable::new(move |_o: Subscriber<i32>| {
            *runs_c.lock().unwrap() += 1;
            Subscription::empty()
        })
        .publish();

        let first = source.connect();
        let second = source.connect();
        assert_eq!(*runs.lock().unwrap(), 1);
        assert!(source.is_connected());

        // Releasing a handle of the live connection disconnects it.
        second.unsubscribe();
        assert!(!source.is_connected());
        first.unsubscribe();

        let third = source.connect();
        assert_eq!(*runs.lock().unwrap(), 2);
        third.unsubscribe();
    }

    #[test]
    fn clones_share_the_connection() {
        let source = Observable::range(0, 3).publish();
        let clone = source.clone();

        let connection = clone.connect();
        assert!(source.is_connected());
        connection.unsubscribe();
        assert!(!source.is_connected());
    }

    #[test]
    fn subscribers_before_connect_see_nothing_until_connected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_c = Arc::clone(&seen);
        let source = Observable::range(0, 3).replay(1);

        source.subscribe_next(move |v| seen_c.lock().unwrap().push(v));
        assert!(seen.lock().unwrap().is_empty());

        let _connection = source.connect();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }
}
