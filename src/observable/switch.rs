use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::{
    lock,
    observer::Observer,
    subscription::{
        serial::SerialSubscription,
        subscribe::{Subscribeable, Subscriber, Subscription, UnsubscribeLogic, Unsubscribeable},
    },
};

use super::Observable;

#[derive(Default)]
struct SwitchState {
    outer_done: bool,
    inner_active: bool,
}

impl<U: 'static> Observable<Observable<U>> {
    /// Mirrors the most recently emitted inner observable.
    ///
    /// When the outer observable emits, the subscription to the previous inner
    /// observable is released before the new one is subscribed, whether or not
    /// the previous one completed. Signals from released inners are dropped.
    ///
    /// The result completes once both the outer observable and the current inner
    /// observable completed. An error from either ends the sequence.
    #[must_use]
    pub fn switch(self) -> Observable<U> {
        Observable::new(move |o| {
            let parent = o.lifecycle();
            let o_shared = Arc::new(Mutex::new(o));
            let o_cloned_e = Arc::clone(&o_shared);
            let o_cloned_c = Arc::clone(&o_shared);

            let inner_serial = Arc::new(SerialSubscription::new());
            let inner_serial_n = Arc::clone(&inner_serial);
            let state = Arc::new(Mutex::new(SwitchState::default()));
            let state_c = Arc::clone(&state);
            let parent_n = Arc::clone(&parent);

            let u = Subscriber::new(
                move |inner: Observable<U>| {
                    let slot = inner_serial_n.next_slot();
                    trace!(slot, "switching to new inner observable");
                    lock(&state).inner_active = true;

                    let on = Arc::clone(&o_shared);
                    let oe = Arc::clone(&o_shared);
                    let oc = Arc::clone(&o_shared);
                    let (serial_n, serial_e, serial_c) = (
                        Arc::clone(&inner_serial_n),
                        Arc::clone(&inner_serial_n),
                        Arc::clone(&inner_serial_n),
                    );
                    let state_i = Arc::clone(&state);

                    let inner_subscriber = Subscriber::new(
                        move |v| {
                            if serial_n.is_current(slot) {
                                lock(&on).next(v);
                            }
                        },
                        move |e| {
                            if serial_e.is_current(slot) {
                                lock(&oe).error(e);
                            }
                        },
                        move || {
                            if !serial_c.is_current(slot) {
                                return;
                            }
                            let outer_done = {
                                let mut st = lock(&state_i);
                                st.inner_active = false;
                                st.outer_done
                            };
                            if outer_done {
                                lock(&oc).complete();
                            }
                        },
                    )
                    .linked_to(&parent_n);

                    let s = inner.subscribe(inner_subscriber);
                    inner_serial_n.set(slot, s);
                },
                move |observable_error| lock(&o_cloned_e).error(observable_error),
                move || {
                    let inner_active = {
                        let mut st = lock(&state_c);
                        st.outer_done = true;
                        st.inner_active
                    };
                    if !inner_active {
                        lock(&o_cloned_c).complete();
                    }
                },
            )
            .linked_to(&parent);

            let mut outer = self.subscribe(u);
            let handle = outer.take_handle();
            Subscription::new(
                UnsubscribeLogic::Logic(Box::new(move || {
                    outer.unsubscribe();
                    inner_serial.unsubscribe();
                })),
                handle,
            )
        })
    }
}
