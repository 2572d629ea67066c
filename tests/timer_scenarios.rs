//! Timer wheel scenarios: sleep accuracy, refresh, cancel/fire laws.

use fibril::test_utils::init_test_logging;
use fibril::{block_on, sleep, time};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn counting(counter: &Arc<AtomicU64>) -> impl Fn() + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_for_count(counter: &Arc<AtomicU64>, at_least: u64, budget: Duration) -> u64 {
    let deadline = Instant::now() + budget;
    loop {
        let seen = counter.load(Ordering::SeqCst);
        if seen >= at_least || Instant::now() >= deadline {
            return seen;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn refreshed_timer_fires_once_after_the_refresh() {
    init_test_logging();
    let counter = Arc::new(AtomicU64::new(0));
    let handle = time::schedule(Duration::from_millis(200), counting(&counter), false);

    std::thread::sleep(Duration::from_millis(100));
    let refresh_at = Instant::now();
    let refreshed = time::refresh(&handle).expect("timer is live");

    // The old handle is cancelled, not the callback.
    assert!(!time::cancel(&handle));

    let fired = wait_for_count(&counter, 1, Duration::from_secs(2));
    let elapsed = refresh_at.elapsed();
    assert_eq!(fired, 1, "exactly one fire");
    assert!(
        elapsed >= Duration::from_millis(195),
        "fired {elapsed:?} after refresh"
    );

    // No second fire from the original schedule.
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(!time::cancel(&refreshed), "fired timer is gone");
}

#[test]
fn cancel_after_fire_and_fire_after_cancel_are_noops() {
    init_test_logging();
    let counter = Arc::new(AtomicU64::new(0));

    // Fire then cancel.
    let handle = time::schedule(Duration::from_millis(10), counting(&counter), false);
    assert_eq!(wait_for_count(&counter, 1, Duration::from_secs(1)), 1);
    assert!(!time::cancel(&handle));

    // Cancel then (attempted) fire.
    let handle = time::schedule(Duration::from_millis(20), counting(&counter), false);
    assert!(time::cancel(&handle));
    assert!(!time::fire_now(&handle));
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn repeating_timer_until_cancel() {
    init_test_logging();
    let counter = Arc::new(AtomicU64::new(0));
    let handle = time::schedule(Duration::from_millis(10), counting(&counter), true);

    let seen = wait_for_count(&counter, 3, Duration::from_secs(3));
    assert!(seen >= 3, "saw {seen} fires");
    assert!(time::cancel(&handle));
}

#[test]
fn sleep_resolution_is_close_to_requested() {
    init_test_logging();
    for requested in [10_u64, 50, 120] {
        let start = Instant::now();
        block_on(sleep(Duration::from_millis(requested)));
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(requested.saturating_sub(2)),
            "requested {requested} ms, slept {elapsed:?}"
        );
        assert!(
            elapsed <= Duration::from_millis(requested + 150),
            "requested {requested} ms, slept {elapsed:?}"
        );
    }
}

#[test]
fn concurrent_sleeps_fire_independently() {
    init_test_logging();
    let start = Instant::now();
    let handles: Vec<_> = [60_u64, 20, 40]
        .into_iter()
        .map(|ms| fibril::spawn(async move { sleep(Duration::from_millis(ms)).await }))
        .collect();
    for handle in handles {
        block_on(handle);
    }
    let elapsed = start.elapsed();
    // All three ran concurrently: bounded by the longest, not the sum.
    assert!(elapsed >= Duration::from_millis(55), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
}
