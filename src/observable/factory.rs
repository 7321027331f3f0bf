use std::sync::Arc;

use crate::{
    errors::SharedError,
    observer::Observer,
    subscription::subscribe::{Subscriber, Subscription, SubscriptionHandle, UnsubscribeLogic},
};

use super::Observable;

impl<T: 'static> Observable<T> {
    /// An observable that completes immediately without emitting.
    #[must_use]
    pub fn empty() -> Self {
        Observable::new(|mut o: Subscriber<T>| {
            o.complete();
            Subscription::empty()
        })
    }

    /// An observable that never emits and never terminates.
    ///
    /// The subscriber stays alive until the subscription is released.
    #[must_use]
    pub fn never() -> Self {
        Observable::new(|o: Subscriber<T>| {
            Subscription::new(
                UnsubscribeLogic::Logic(Box::new(move || drop(o))),
                SubscriptionHandle::Nil,
            )
        })
    }

    /// An observable that errors immediately with `error`.
    ///
    /// Returning this from a `catch` handler re-raises the error.
    #[must_use]
    pub fn throw_error(error: SharedError) -> Self {
        Observable::new(move |mut o: Subscriber<T>| {
            o.error(Arc::clone(&error));
            Subscription::empty()
        })
    }

    /// Emits `value` once, then completes.
    pub fn of(value: T) -> Self
    where
        T: Clone + Send + Sync,
    {
        Observable::new(move |mut o| {
            o.next(value.clone());
            o.complete();
            Subscription::empty()
        })
    }

    /// Emits every item of `iter`, then completes.
    ///
    /// Emission stops early once the subscriber is closed.
    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    {
        Observable::new(move |mut o| {
            for v in iter.clone() {
                if o.try_next(v).is_err() {
                    return Subscription::empty();
                }
            }
            o.complete();
            Subscription::empty()
        })
    }
}

impl Observable<i64> {
    /// Emits `count` consecutive integers starting at `start`, then completes.
    #[must_use]
    pub fn range(start: i64, count: usize) -> Self {
        Observable::new(move |mut o| {
            let mut v = start;
            for _ in 0..count {
                if o.try_next(v).is_err() {
                    return Subscription::empty();
                }
                v = v.wrapping_add(1);
            }
            o.complete();
            Subscription::empty()
        })
    }
}
