mod custom_error;
mod generate_observable;
mod logging;
mod register_emissions;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use custom_error::CustomError;
use generate_observable::{generate_u32_observable, generate_u32_task_observable};
use register_emissions::Emissions;
use rxcore::{
    subscribe::{Subscriber, Subscription, SubscriptionHandle, UnsubscribeLogic},
    Observable, ObservableError, ObservableExt, Observer, Subscribeable,
};

struct CheckFinished {
    last_value: i32,
    completed: bool,
}

#[test]
fn map_observable() {
    logging::init();

    let last_emit_value = Arc::new(Mutex::new(CheckFinished {
        last_value: 0,
        completed: false,
    }));
    let last_emit_value_c1 = Arc::clone(&last_emit_value);
    let last_emit_value_c2 = Arc::clone(&last_emit_value);

    let value = 100;
    let s = Observable::new(move |mut o: Subscriber<_>| {
        o.next(value);
        o.complete();
        Subscription::new(UnsubscribeLogic::Nil, SubscriptionHandle::Nil)
    });

    let s = s.map(|x| {
        let y = x + 1000;
        format!("emit to str {}", y)
    });

    let o = Subscriber::new(
        move |v: String| {
            assert_eq!(v, "emit to str 1100");
            // Make sure next is invoked.
            last_emit_value_c1.lock().unwrap().last_value = 1;
        },
        |observable_error| panic!("map failed: {observable_error}"),
        move || {
            let mut check = last_emit_value_c2.lock().unwrap();
            check.completed = true;
            assert_eq!(check.last_value, 1, "next method not called before complete");
        },
    );

    s.subscribe(o);
    assert!(
        last_emit_value.lock().unwrap().completed,
        "map operator did not complete observable"
    );
}

#[test]
fn map_chain_over_thread_observable() {
    logging::init();

    let emissions = Emissions::new();
    let s = generate_u32_observable(30, |_| {})
        .map(|v| v as i64 - 15)
        .map(|v| v.abs())
        .subscribe(emissions.subscriber());
    s.join().unwrap();

    let expected: Vec<i64> = (0..=30_i64).map(|v| (v - 15).abs()).collect();
    assert_eq!(emissions.nexts(), expected);
    assert_eq!(emissions.completes(), 1);
}

#[test]
fn try_map_stops_at_first_failure() {
    logging::init();

    let emissions = Emissions::new();
    Observable::range(1, 10)
        .try_map(|v| {
            if v == 4 {
                Err(CustomError::new(4, "four is not allowed"))
            } else {
                Ok(v * v)
            }
        })
        .subscribe(emissions.subscriber());

    assert_eq!(emissions.nexts(), vec![1, 4, 9]);
    assert_eq!(emissions.errors(), vec!["custom error 4: four is not allowed"]);
    assert_eq!(emissions.completes(), 0);
}

#[test]
fn tap_observes_without_changing_values() {
    logging::init();

    let tapped = Arc::new(Mutex::new(Vec::new()));
    let tapped_c = Arc::clone(&tapped);
    let emissions = Emissions::new();

    Observable::from_iter(vec!["a", "b", "c"])
        .tap(move |v| tapped_c.lock().unwrap().push(v.to_string()))
        .map(str::to_uppercase)
        .subscribe(emissions.subscriber());

    assert_eq!(*tapped.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(emissions.nexts(), vec!["A", "B", "C"]);
    assert_eq!(emissions.completes(), 1);
}

#[test]
fn try_tap_error_skips_the_value() {
    logging::init();

    let emissions = Emissions::new();
    Observable::range(0, 5)
        .try_tap(|v| {
            if *v == 2 {
                return Err(CustomError::new(2, "rejected by tap"));
            }
            Ok(())
        })
        .subscribe(emissions.subscriber());

    assert_eq!(emissions.nexts(), vec![0, 1]);
    assert_eq!(emissions.errors(), vec!["custom error 2: rejected by tap"]);
}

#[test]
fn panicking_subscribe_fn_is_reported_as_error() {
    logging::init();

    let emissions = Emissions::<u8>::new();
    let s = Observable::new(|mut o: Subscriber<u8>| {
        o.next(1);
        let bytes: Vec<u8> = Vec::new();
        o.next(bytes[3]);
        Subscription::empty()
    })
    .map(|v| v + 1)
    .subscribe(emissions.subscriber());

    assert_eq!(emissions.nexts(), vec![2]);
    let errors = emissions.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("producer failed: index out of bounds"));
    assert!(s.is_closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn first_releases_task_observable() {
    logging::init();

    let value = generate_u32_task_observable(10_000)
        .map(|v| v + 7)
        .first()
        .await
        .unwrap();
    assert_eq!(value, 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_first_releases_subscription() {
    logging::init();

    let released = Arc::new(Mutex::new(false));
    let released_c = Arc::clone(&released);
    let never = Observable::new(move |_: Subscriber<i32>| {
        let released = Arc::clone(&released_c);
        Subscription::new(
            UnsubscribeLogic::Logic(Box::new(move || *released.lock().unwrap() = true)),
            SubscriptionHandle::Nil,
        )
    });

    let timed_out = tokio::time::timeout(Duration::from_millis(20), never.first()).await;
    assert!(timed_out.is_err());
    assert!(*released.lock().unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn first_stops_endless_synchronous_source() {
    logging::init();

    let produced = Arc::new(Mutex::new(0));
    let produced_c = Arc::clone(&produced);

    let value = Observable::from_iter(0_u64..)
        .tap(move |_| *produced_c.lock().unwrap() += 1)
        .map(|v| v * 2)
        .first()
        .await
        .unwrap();

    assert_eq!(value, 0);
    assert_eq!(*produced.lock().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn first_on_never_stays_pending() {
    logging::init();

    let never = Observable::<i32>::never();
    let pending = tokio::time::timeout(Duration::from_millis(20), never.first()).await;
    assert!(pending.is_err(), "first() resolved on a source that never emits");
}

#[tokio::test(flavor = "multi_thread")]
async fn first_waits_when_producer_drops_subscriber() {
    logging::init();

    let forgetful = Observable::new(|o: Subscriber<i32>| {
        drop(o);
        Subscription::empty()
    });
    let pending = tokio::time::timeout(Duration::from_millis(20), forgetful.first()).await;
    assert!(pending.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn first_reports_error_before_value() {
    logging::init();

    let failing = Observable::<i32>::throw_error(Arc::new(CustomError::new(1, "no value")));
    let err = failing.first().await.unwrap_err();
    assert_eq!(err.to_string(), "custom error 1: no value");

    let err = Observable::<i32>::empty().first().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ObservableError>(),
        Some(ObservableError::NoElements)
    ));
}

#[test]
fn observer_can_be_passed_directly() {
    logging::init();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_c = Arc::clone(&seen);

    let mut subscriber = Subscriber::on_next(move |v: i64| seen_c.lock().unwrap().push(v));
    subscriber.on_error(|e| panic!("unexpected error: {e}"));
    Observable::range(3, 3).subscribe(subscriber);

    assert_eq!(*seen.lock().unwrap(), vec![3, 4, 5]);
}
