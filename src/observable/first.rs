use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::{
    errors::{ObservableError, SharedError},
    lock,
    subscription::{
        serial::SerialSubscription,
        subscribe::{Lifecycle, Subscribeable, Subscriber},
    },
};

type Outcome<T> = Result<T, SharedError>;

/// Future returned by [`ObservableExt::first`](crate::ObservableExt::first).
///
/// Dropping it before it resolves releases the subscription.
pub struct First<T> {
    rx: oneshot::Receiver<Outcome<T>>,
    // Held so a producer dropping its subscriber leaves the future pending.
    _tx: Arc<Mutex<Option<oneshot::Sender<Outcome<T>>>>>,
    subscription: Arc<SerialSubscription>,
}

impl<T: Send + 'static> First<T> {
    pub(super) fn subscribe<S>(source: &S) -> Self
    where
        S: Subscribeable<ObsType = T>,
    {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let (tx_n, tx_e, tx_c) = (Arc::clone(&tx), Arc::clone(&tx), Arc::clone(&tx));

        let subscription = Arc::new(SerialSubscription::new());
        let subscription_n = Arc::clone(&subscription);
        let slot = subscription.next_slot();

        // Closed on the first value, also while `subscribe` has not returned yet.
        let scope = Lifecycle::new();
        let scope_n = Arc::clone(&scope);

        let subscriber = Subscriber::new(
            move |v: T| {
                if let Some(tx) = lock(&tx_n).take() {
                    let _ = tx.send(Ok(v));
                    scope_n.close();
                    subscription_n.unsubscribe();
                }
            },
            move |e| {
                if let Some(tx) = lock(&tx_e).take() {
                    let _ = tx.send(Err(e));
                }
            },
            move || {
                if let Some(tx) = lock(&tx_c).take() {
                    let _ = tx.send(Err(ObservableError::NoElements.shared()));
                }
            },
        )
        .linked_to(&scope);
        let s = source.subscribe(subscriber);
        subscription.set(slot, s);

        First {
            rx,
            _tx: tx,
            subscription,
        }
    }
}

impl<T> Future for First<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The sender is shared with this future, so the channel cannot close
        // without a message while it is polled.
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|r| {
            r.unwrap_or_else(|_| {
                Err(ObservableError::Message("first: value channel closed".to_string()).shared())
            })
        })
    }
}

impl<T> Drop for First<T> {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
