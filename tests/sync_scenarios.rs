//! Mutex, condition variable, and wait-group scenarios.

use fibril::sync::{Condvar, Mutex, WaitGroup};
use fibril::test_utils::init_test_logging;
use fibril::{block_on, spawn, yield_now};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn mutex_stress_twenty_tasks_fifty_increments() {
    init_test_logging();
    fibril::test_phase!("mutex_stress_twenty_tasks_fifty_increments");
    let counter = Arc::new(Mutex::new(0_u64));
    let group = WaitGroup::new();
    group.add(20);

    for _ in 0..20 {
        let counter = Arc::clone(&counter);
        let group = group.clone();
        spawn(async move {
            for _ in 0..50 {
                let mut guard = counter.lock().await;
                *guard += 1;
                drop(guard);
                yield_now().await;
            }
            group.done();
        });
    }

    block_on(group.wait());
    let total = block_on(async { *counter.lock().await });
    fibril::assert_with_log!(total == 1000, "final counter", 1000, total);
    assert!(!counter.is_locked());
    fibril::test_complete!("mutex_stress_twenty_tasks_fifty_increments");
}

#[test]
fn condvar_timeout_without_notify() {
    init_test_logging();
    let mutex = Mutex::new(());
    let condvar = Condvar::new();

    let start = Instant::now();
    let timed_out = block_on(async {
        let guard = mutex.lock().await;
        let (_guard, result) = condvar
            .wait_timeout(guard, Duration::from_millis(200))
            .await;
        result.timed_out()
    });
    let elapsed = start.elapsed();

    assert!(timed_out);
    assert!(
        elapsed >= Duration::from_millis(150) && elapsed <= Duration::from_millis(300),
        "wait returned after {elapsed:?}"
    );
}

#[test]
fn condvar_notify_beats_deadline() {
    init_test_logging();
    let mutex = Arc::new(Mutex::new(()));
    let condvar = Arc::new(Condvar::new());

    let notifier = {
        let condvar = Arc::clone(&condvar);
        spawn(async move {
            fibril::sleep(Duration::from_millis(200)).await;
            condvar.notify_one();
        })
    };

    let start = Instant::now();
    let timed_out = block_on(async {
        let guard = mutex.lock().await;
        let (_guard, result) = condvar
            .wait_timeout(guard, Duration::from_millis(500))
            .await;
        result.timed_out()
    });
    let elapsed = start.elapsed();

    assert!(!timed_out, "the notify must win");
    assert!(
        elapsed >= Duration::from_millis(150) && elapsed <= Duration::from_millis(400),
        "wait returned after {elapsed:?}"
    );
    block_on(notifier);
}

#[test]
fn wait_group_coordinates_task_completion() {
    init_test_logging();
    let group = WaitGroup::new();
    let results = Arc::new(Mutex::new(Vec::new()));
    group.add(8);

    for i in 0..8 {
        let group = group.clone();
        let results = Arc::clone(&results);
        spawn(async move {
            fibril::sleep(Duration::from_millis(5 * (i % 3))).await;
            results.lock().await.push(i);
            group.done();
        });
    }

    block_on(group.wait());
    let mut seen = block_on(async { results.lock().await.clone() });
    seen.sort_unstable();
    assert_eq!(seen, (0..8).collect::<Vec<_>>());
    assert_eq!(group.count(), 0);
}

#[test]
fn mutex_guard_across_suspension_points() {
    init_test_logging();
    let mutex = Arc::new(Mutex::new(0_u64));

    let holder = {
        let mutex = Arc::clone(&mutex);
        spawn(async move {
            let mut guard = mutex.lock().await;
            // Hold the lock across a sleep; contenders must wait.
            fibril::sleep(Duration::from_millis(50)).await;
            *guard = 7;
        })
    };

    let observed = block_on(async {
        // Give the holder time to acquire first.
        fibril::sleep(Duration::from_millis(10)).await;
        *mutex.lock().await
    });
    assert_eq!(observed, 7);
    block_on(holder);
}
