//! Scheduler scenarios: spawn/join, yielding, coroutines, work stealing.

use fibril::test_utils::init_test_logging;
use fibril::{block_on, spawn, yield_now, Coroutine, Resume, Runtime};
use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn crunch(iterations: u64) -> u64 {
    let mut acc = 0_u64;
    for i in 0..iterations {
        acc = acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(i);
    }
    black_box(acc)
}

#[test]
fn spawned_tasks_run_concurrently_with_spawner() {
    init_test_logging();
    let counter = Arc::new(AtomicU64::new(0));
    let handles: Vec<_> = (0..100)
        .map(|_| {
            let counter = Arc::clone(&counter);
            spawn(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    for handle in handles {
        block_on(handle);
    }
    assert_eq!(counter.load(Ordering::SeqCst), 100);
}

#[test]
fn yield_interleaves_cooperative_tasks() {
    init_test_logging();
    let log = Arc::new(fibril::sync::Mutex::new(Vec::new()));
    let group = fibril::sync::WaitGroup::new();
    group.add(2);

    for name in ["a", "b"] {
        let log = Arc::clone(&log);
        let group = group.clone();
        spawn(async move {
            for round in 0..3 {
                log.lock().await.push(format!("{name}{round}"));
                yield_now().await;
            }
            group.done();
        });
    }

    block_on(group.wait());
    let entries = block_on(async { log.lock().await.clone() });
    assert_eq!(entries.len(), 6);
    // Both tasks made progress; exact interleaving is unspecified.
    assert!(entries.iter().any(|e| e.starts_with('a')));
    assert!(entries.iter().any(|e| e.starts_with('b')));
}

#[test]
fn coroutine_stepping_is_deterministic() {
    init_test_logging();
    let mut coroutine = Coroutine::new(async {
        let mut sum = 0_u64;
        for i in 1..=3 {
            sum += i;
            yield_now().await;
        }
        sum
    });

    // Three suspensions, then completion.
    let mut suspensions = 0;
    let total = loop {
        match coroutine.resume() {
            Resume::Suspended => suspensions += 1,
            Resume::Complete(total) => break total,
        }
    };
    assert_eq!(suspensions, 3);
    assert_eq!(total, 6);
}

#[test]
fn work_stealing_spreads_compute_tasks() {
    init_test_logging();
    let workers = Runtime::global().config().worker_threads;
    const TASKS: u64 = 1000;
    const ITERS: u64 = 40_000;

    // Sequential baseline on this thread.
    let sequential_start = Instant::now();
    for _ in 0..TASKS {
        crunch(ITERS);
    }
    let sequential = sequential_start.elapsed();

    let parallel_start = Instant::now();
    let handles: Vec<_> = (0..TASKS)
        .map(|_| spawn(async move { crunch(ITERS) }))
        .collect();
    for handle in handles {
        block_on(handle);
    }
    let parallel = parallel_start.elapsed();

    tracing::info!(
        workers,
        sequential_ms = sequential.as_millis() as u64,
        parallel_ms = parallel.as_millis() as u64,
        "work stealing throughput"
    );

    if workers >= 2 {
        // Pure compute with no suspensions: wall clock should track the
        // sequential baseline divided by the worker count, within 2x.
        let effective = workers.min(4) as u32;
        let limit = sequential * 2 / effective;
        assert!(
            parallel <= limit,
            "parallel {parallel:?} exceeded limit {limit:?} (sequential {sequential:?}, {workers} workers)"
        );
    }
}

#[test]
fn spawn_from_spawned_task() {
    init_test_logging();
    let result = block_on(async {
        let outer = spawn(async {
            let inner = spawn(async { 21 });
            inner.await * 2
        });
        outer.await
    });
    assert_eq!(result, 42);
}
