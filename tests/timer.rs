mod logging;
mod register_emissions;

use std::time::Duration;

use register_emissions::Emissions;
use rxcore::{
    scheduler::{Scheduler, ThreadScheduler, TokioScheduler, VirtualTimeScheduler},
    Observable, ObservableExt, Subscribeable, Unsubscribeable,
};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[tokio::test(start_paused = true)]
async fn tokio_timer_emits_every_period() {
    logging::init();

    let emissions = Emissions::new();
    let s = Observable::timer(ms(100), Some(ms(100)), TokioScheduler::current())
        .map(|t| t * 10)
        .subscribe(emissions.subscriber());

    tokio::time::sleep(ms(550)).await;
    assert_eq!(emissions.nexts(), vec![0, 10, 20, 30, 40]);

    s.unsubscribe();
    tokio::time::sleep(ms(1000)).await;
    assert_eq!(emissions.nexts().len(), 5);
    assert_eq!(emissions.completes(), 0);
}

#[tokio::test(start_paused = true)]
async fn tokio_single_shot_timer_completes() {
    logging::init();

    let scheduler = TokioScheduler::current();
    let emissions = Emissions::new();
    Observable::timer(ms(250), None, scheduler.clone()).subscribe(emissions.subscriber());

    tokio::time::sleep(ms(200)).await;
    assert!(emissions.nexts().is_empty());
    tokio::time::sleep(ms(100)).await;

    assert_eq!(emissions.nexts(), vec![0]);
    assert_eq!(emissions.completes(), 1);
    assert!(scheduler.now() >= ms(300));
}

#[tokio::test(start_paused = true)]
async fn tokio_timer_first_value() {
    logging::init();

    let first = Observable::timer(ms(10), Some(ms(10)), TokioScheduler::current())
        .first()
        .await
        .unwrap();
    assert_eq!(first, 0);
}

#[test]
fn thread_timer_stops_after_unsubscribe() {
    logging::init();

    let emissions = Emissions::new();
    let s = Observable::timer(ms(5), Some(ms(5)), ThreadScheduler::new())
        .subscribe(emissions.subscriber());

    std::thread::sleep(ms(100));
    s.unsubscribe();
    let stopped_at = emissions.nexts().len();
    assert!(stopped_at >= 2, "thread timer emitted {stopped_at} values");

    std::thread::sleep(ms(50));
    let nexts = emissions.nexts();
    // One tick may have been in flight while unsubscribing.
    assert!(nexts.len() <= stopped_at + 1);
    assert_eq!(nexts, (0..nexts.len() as u64).collect::<Vec<_>>());
}

#[test]
fn virtual_timer_runs_on_advance_only() {
    logging::init();

    let scheduler = VirtualTimeScheduler::new();
    let emissions = Emissions::new();
    let s = Observable::timer(ms(30), Some(ms(20)), scheduler.clone())
        .subscribe(emissions.subscriber());

    assert!(emissions.nexts().is_empty());
    scheduler.advance_by(ms(29));
    assert!(emissions.nexts().is_empty());
    scheduler.advance_to(ms(70));
    assert_eq!(emissions.nexts(), vec![0, 1, 2]);
    assert_eq!(scheduler.now(), ms(70));

    s.unsubscribe();
    assert_eq!(scheduler.pending(), 0);
    scheduler.advance_by(ms(1000));
    assert_eq!(emissions.nexts(), vec![0, 1, 2]);
}

#[test]
fn virtual_flush_drains_single_shot_timers() {
    logging::init();

    let scheduler = VirtualTimeScheduler::new();
    let emissions = Emissions::new();
    for due in [300, 100, 200] {
        Observable::timer(ms(due), None, scheduler.clone())
            .map(move |_| due)
            .subscribe(emissions.subscriber());
    }

    scheduler.flush();

    assert_eq!(emissions.nexts(), vec![100, 200, 300]);
    assert_eq!(emissions.completes(), 3);
    assert_eq!(scheduler.now(), ms(300));
}
