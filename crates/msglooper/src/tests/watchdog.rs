use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{init_logging, wait_until};
use crate::watchdog::{Heartbeat, StallDetector};
use crate::{Looper, LooperError, Message};

fn stall_counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let probe = Arc::clone(&count);
    (count, move || {
        probe.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn detector_trips_once_per_episode() {
    let heartbeat = Heartbeat::new();
    let mut detector = StallDetector::new(Duration::from_millis(50));

    heartbeat.beat();
    let now = Instant::now();
    assert!(!detector.poll(&heartbeat, now));
    assert!(detector.poll(&heartbeat, now + Duration::from_millis(100)));
    assert!(!detector.poll(&heartbeat, now + Duration::from_millis(200)));

    heartbeat.beat();
    let now = Instant::now();
    assert!(!detector.poll(&heartbeat, now));
    assert!(detector.poll(&heartbeat, now + Duration::from_secs(1)));
}

#[test]
fn idle_worker_never_trips() {
    let heartbeat = Heartbeat::new();
    let mut detector = StallDetector::new(Duration::from_millis(10));
    assert!(heartbeat.is_idle());
    assert!(!detector.poll(&heartbeat, Instant::now() + Duration::from_secs(5)));

    heartbeat.beat();
    heartbeat.set_idle();
    assert!(!detector.poll(&heartbeat, Instant::now() + Duration::from_secs(5)));
}

#[test]
fn long_dispatch_reports_single_stall() {
    init_logging();
    let (stalls, on_stall) = stall_counter();
    let looper = Looper::builder("wdt-stall").build().unwrap();
    looper
        .enable_watchdog(Duration::from_millis(30), on_stall)
        .unwrap();
    assert!(!looper.watchdog_armed());

    looper.start().unwrap();
    assert!(looper.watchdog_armed());
    looper
        .post(Message::empty(1).with_dispatch(|_| thread::sleep(Duration::from_millis(200))))
        .unwrap();

    assert!(wait_until(Duration::from_secs(1), || {
        stalls.load(Ordering::SeqCst) >= 1
    }));
    thread::sleep(Duration::from_millis(250));
    assert_eq!(stalls.load(Ordering::SeqCst), 1);

    looper.stop();
    assert!(!looper.watchdog_armed());
}

#[test]
fn consecutive_stalls_are_reported_separately() {
    init_logging();
    let (stalls, on_stall) = stall_counter();
    let looper = Looper::builder("wdt-rearm").build().unwrap();
    looper.start().unwrap();
    looper
        .enable_watchdog(Duration::from_millis(30), on_stall)
        .unwrap();
    assert!(looper.watchdog_armed());

    for what in 0..2 {
        looper
            .post(Message::empty(what).with_dispatch(|_| thread::sleep(Duration::from_millis(150))))
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || {
        stalls.load(Ordering::SeqCst) >= 2
    }));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(stalls.load(Ordering::SeqCst), 2);
    looper.stop();
}

#[test]
fn idle_looper_is_not_reported() {
    init_logging();
    let (stalls, on_stall) = stall_counter();
    let looper = Looper::builder("wdt-idle").build().unwrap();
    looper
        .enable_watchdog(Duration::from_millis(20), on_stall)
        .unwrap();
    looper.start().unwrap();
    looper
        .post_delay(Message::empty(1), Duration::from_secs(10))
        .unwrap();

    thread::sleep(Duration::from_millis(120));
    assert_eq!(stalls.load(Ordering::SeqCst), 0);
    looper.stop();
}

#[test]
fn disabled_watchdog_stays_silent() {
    init_logging();
    let (stalls, on_stall) = stall_counter();
    let looper = Looper::builder("wdt-off").build().unwrap();
    looper
        .enable_watchdog(Duration::from_millis(20), on_stall)
        .unwrap();
    looper.disable_watchdog();
    looper.start().unwrap();
    looper
        .post(Message::empty(1).with_dispatch(|_| thread::sleep(Duration::from_millis(100))))
        .unwrap();

    thread::sleep(Duration::from_millis(150));
    assert_eq!(stalls.load(Ordering::SeqCst), 0);
    assert!(!looper.watchdog_armed());
    looper.stop();
}

#[test]
fn zero_period_is_rejected() {
    let looper = Looper::builder("wdt-zero").build().unwrap();
    let err = looper.enable_watchdog(Duration::ZERO, || {}).unwrap_err();
    assert!(matches!(err, LooperError::InvalidConfig(_)));
}
