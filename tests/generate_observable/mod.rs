use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rxcore::{
    subscribe::{Subscriber, Subscription, SubscriptionHandle, UnsubscribeLogic},
    Observable, Observer,
};

/// Emits `0..=end` from an OS thread, one value per millisecond, then completes.
///
/// `last_emit_assert` receives the last value emitted before the thread stopped,
/// either because the range ran out or because the subscriber was closed.
pub fn generate_u32_observable(
    end: u32,
    last_emit_assert: impl FnMut(u32) + Send + Sync + 'static,
) -> Observable<u32> {
    let last_emit_assert = Arc::new(Mutex::new(last_emit_assert));

    Observable::new(move |mut o: Subscriber<_>| {
        let last_emit_assert = Arc::clone(&last_emit_assert);
        let jh = std::thread::spawn(move || {
            let mut last_emit = 0;

            for i in 0..=end {
                if o.is_closed() {
                    break;
                }
                last_emit = i;
                o.next(i);
                std::thread::sleep(Duration::from_millis(1));
            }
            o.complete();
            last_emit_assert.lock().unwrap()(last_emit);
        });

        Subscription::new(UnsubscribeLogic::Nil, SubscriptionHandle::JoinThread(jh))
    })
}

/// Like `generate_u32_observable`, but produces from a tokio task and stops it
/// through the subscription's teardown instead of polling the subscriber.
pub fn generate_u32_task_observable(end: u32) -> Observable<u32> {
    Observable::new(move |mut o: Subscriber<_>| {
        let (tx, mut rx) = tokio::sync::oneshot::channel::<()>();

        let jh = tokio::spawn(async move {
            for i in 0..=end {
                if rx.try_recv().is_ok() {
                    return;
                }
                o.next(i);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            o.complete();
        });

        Subscription::new(
            UnsubscribeLogic::Future(Box::pin(async move {
                let _ = tx.send(());
            })),
            SubscriptionHandle::JoinTask(jh),
        )
    })
}
