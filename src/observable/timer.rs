use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tracing::trace;

use crate::{
    lock,
    observer::Observer,
    scheduler::{Scheduler, TaskHandle},
    subscription::subscribe::{Subscriber, Subscription, SubscriptionHandle, UnsubscribeLogic},
};

use super::Observable;

struct PendingTick {
    tick: u64,
    handle: Option<TaskHandle>,
    cancelled: bool,
}

// One running timer, owned by a single subscription.
struct TimerRun<S> {
    subscriber: Mutex<Subscriber<u64>>,
    scheduler: S,
    period: Option<Duration>,
    pending: Mutex<PendingTick>,
}

impl<S: Scheduler> TimerRun<S> {
    fn schedule(this: &Arc<Self>, delay: Duration, tick: u64) {
        let run = Arc::clone(this);
        let handle = this
            .scheduler
            .schedule(delay, Box::new(move || TimerRun::fire(&run, tick)));

        let mut pending = lock(&this.pending);
        if pending.cancelled {
            drop(pending);
            handle.cancel();
        } else if tick >= pending.tick {
            // The task may already have fired and scheduled its successor.
            pending.tick = tick;
            pending.handle = Some(handle);
        }
    }

    fn fire(this: &Arc<Self>, tick: u64) {
        let mut o = lock(&this.subscriber);
        if o.is_closed() {
            return;
        }
        trace!(tick, "timer fired");
        o.next(tick);
        match this.period {
            Some(period) => {
                let closed = o.is_closed();
                drop(o);
                if !closed {
                    TimerRun::schedule(this, period, tick + 1);
                }
            }
            None => o.complete(),
        }
    }

    fn cancel(&self) {
        let handle = {
            let mut pending = lock(&self.pending);
            pending.cancelled = true;
            pending.handle.take()
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
    }
}

impl Observable<u64> {
    /// Emits 0 once `due` has elapsed after subscription, then 1, 2, 3, … every
    /// `period`. Without a period the timer completes after its single emission.
    ///
    /// Every subscription runs its own timer on `scheduler`. Releasing the
    /// subscription cancels the pending scheduled task.
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
    ///     );
    ///
    ///     let subscription = ticks.map(|t| t * 10).subscribe_next(|v| println!("{}", v));
    ///     tokio::time::sleep(Duration::from_millis(550)).await;
    ///
    ///     // Prints 0, 10, 20, 30, 40 and then stops.
    ///     rxcore::Unsubscribeable::unsubscribe(subscription);
    /// }
    /// ```
    pub fn timer<S>(due: Duration, period: Option<Duration>, scheduler: S) -> Self
    where
        S: Scheduler + Clone,
    {
        Observable::new(move |o| {
            let run = Arc::new(TimerRun {
                subscriber: Mutex::new(o),
                scheduler: scheduler.clone(),
                period,
                pending: Mutex::new(PendingTick {
                    tick: 0,
                    handle: None,
                    cancelled: false,
                }),
            });
            TimerRun::schedule(&run, due, 0);

            Subscription::new(
                UnsubscribeLogic::Logic(Box::new(move || run.cancel())),
                SubscriptionHandle::Nil,
            )
        })
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use crate::{
        observable::Observable,
        scheduler::VirtualTimeScheduler,
        subscription::subscribe::{Subscribeable, Unsubscribeable},
    };

    #[test]
    fn one_shot_timer_emits_zero_then_completes() {
        let scheduler = VirtualTimeScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (n, c) = (Arc::clone(&log), Arc::clone(&log));

        Observable::timer(Duration::from_secs(1), None, scheduler.clone()).subscribe_with(
            move |v| n.lock().unwrap().push(format!("{v}")),
            |_| (),
            move || c.lock().unwrap().push("complete".to_string()),
        );

        scheduler.advance_by(Duration::from_millis(999));
        assert!(log.lock().unwrap().is_empty());
        scheduler.advance_by(Duration::from_millis(1));
        assert_eq!(*log.lock().unwrap(), vec!["0", "complete"]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn periodic_timer_stops_on_unsubscribe() {
        let scheduler = VirtualTimeScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_c = Arc::clone(&log);

        let s = Observable::timer(
            Duration::from_secs(1),
            Some(Duration::from_secs(2)),
            scheduler.clone(),
        )
        .subscribe_next(move |v| log_c.lock().unwrap().push(v));

        scheduler.advance_to(Duration::from_secs(5));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(scheduler.pending(), 1);

        s.unsubscribe();
        assert_eq!(scheduler.pending(), 0);
        scheduler.advance_by(Duration::from_secs(10));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn each_subscription_owns_its_timer() {
        let scheduler = VirtualTimeScheduler::new();
        let timer = Observable::timer(Duration::from_secs(1), None, scheduler.clone());

        timer.subscribe_next(|_| ());
        scheduler.advance_by(Duration::from_millis(500));
        timer.subscribe_next(|_| ());

        assert_eq!(scheduler.pending(), 2);
        scheduler.advance_by(Duration::from_millis(500));
        assert_eq!(scheduler.pending(), 1);
    }
}
