use std::sync::Mutex;

use crate::lock;

use super::subscribe::{Subscription, Unsubscribeable};

struct SerialState {
    generation: u64,
    current: Option<Subscription>,
    closed: bool,
}

/// Holds at most one live inner subscription and swaps it out as operators
/// move from one source to the next.
///
/// Each swap opens a new slot. Subscriptions stored for an older slot, or
/// stored after the holder was closed, are released on the spot. That keeps a
/// source that terminated synchronously during its own `subscribe` call from
/// overwriting the subscription of its replacement.
pub(crate) struct SerialSubscription {
    state: Mutex<SerialState>,
}

impl SerialSubscription {
    pub(crate) fn new() -> Self {
        SerialSubscription {
            state: Mutex::new(SerialState {
                generation: 0,
                current: None,
                closed: false,
            }),
        }
    }

    /// Releases the current inner subscription and opens a new slot.
    pub(crate) fn next_slot(&self) -> u64 {
        let (slot, previous) = {
            let mut state = lock(&self.state);
            state.generation += 1;
            (state.generation, state.current.take())
        };
        if let Some(s) = previous {
            s.unsubscribe();
        }
        slot
    }

    /// Stores `subscription` for `slot`, or releases it when the slot is stale.
    pub(crate) fn set(&self, slot: u64, subscription: Subscription) {
        let mut state = lock(&self.state);
        if state.closed || state.generation != slot {
            drop(state);
            subscription.unsubscribe();
            return;
        }
        let previous = state.current.replace(subscription);
        drop(state);
        if let Some(s) = previous {
            s.unsubscribe();
        }
    }

    pub(crate) fn is_current(&self, slot: u64) -> bool {
        let state = lock(&self.state);
        !state.closed && state.generation == slot
    }

    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Closes the holder and releases the current inner subscription.
    pub(crate) fn unsubscribe(&self) {
        let previous = {
            let mut state = lock(&self.state);
            state.closed = true;
            state.generation += 1;
            state.current.take()
        };
        if let Some(s) = previous {
            s.unsubscribe();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::subscription::subscribe::{SubscriptionHandle, UnsubscribeLogic};

    fn counted(counter: &Arc<Mutex<u32>>) -> Subscription {
        let c = Arc::clone(counter);
        Subscription::new(
            UnsubscribeLogic::Logic(Box::new(move || *c.lock().unwrap() += 1)),
            SubscriptionHandle::Nil,
        )
    }

    #[test]
    fn stale_slot_is_released() {
        let released = Arc::new(Mutex::new(0));
        let serial = SerialSubscription::new();

        let first = serial.next_slot();
        let second = serial.next_slot();
        assert!(!serial.is_current(first));
        assert!(serial.is_current(second));

        serial.set(first, counted(&released));
        assert_eq!(*released.lock().unwrap(), 1);

        serial.set(second, counted(&released));
        assert_eq!(*released.lock().unwrap(), 1);

        serial.next_slot();
        assert_eq!(*released.lock().unwrap(), 2);
    }

    #[test]
    fn set_after_unsubscribe_releases() {
        let released = Arc::new(Mutex::new(0));
        let serial = SerialSubscription::new();
        let slot = serial.next_slot();
        serial.unsubscribe();
        assert!(serial.is_closed());

        serial.set(slot, counted(&released));
        assert_eq!(*released.lock().unwrap(), 1);
    }
}
