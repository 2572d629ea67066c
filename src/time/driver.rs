//! Timer driver: the tick thread and the timer registry.
//!
//! A single thread advances the wheel one slot per tick interval and
//! fires due timers. Actions run on the tick thread and must be short
//! and non-blocking: an action that wants to resume a task does so by
//! waking it into the scheduler's ready queue, never by running
//! application logic inline.
//!
//! Cancellation is O(1): a handle is `(id, generation)`, and the registry
//! entry decides liveness at fire time, so `cancel` racing a concurrent
//! fire is resolved by whichever side reaches the registry first.

use crate::time::wheel::{Record, Wheel};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Waker;
use std::time::{Duration, Instant};

/// Opaque handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
    generation: u64,
}

impl TimerHandle {
    /// Returns the timer identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// What a timer does when it fires.
#[derive(Clone)]
pub(crate) enum TimerAction {
    /// Wake a parked task.
    Wake(Waker),
    /// Run a short callback on the tick thread.
    Callback(Arc<dyn Fn() + Send + Sync>),
}

impl TimerAction {
    fn fire(&self) {
        match self {
            Self::Wake(waker) => waker.wake_by_ref(),
            Self::Callback(callback) => callback(),
        }
    }
}

impl std::fmt::Debug for TimerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wake(_) => f.write_str("TimerAction::Wake"),
            Self::Callback(_) => f.write_str("TimerAction::Callback"),
        }
    }
}

#[derive(Debug)]
struct ActiveTimer {
    generation: u64,
    action: TimerAction,
    /// Original delay in ticks; the repeat period and the refresh distance.
    delay: u64,
    repeat: bool,
    /// Sequence of the wheel record currently standing for this timer;
    /// stale records (after `fire_now` re-arms) are ignored at fire time.
    expected_seq: u64,
}

impl ActiveTimer {
    fn period(&self) -> Option<u64> {
        self.repeat.then_some(self.delay)
    }
}

#[derive(Debug)]
struct DriverInner {
    wheel: Wheel,
    active: HashMap<u64, ActiveTimer>,
    next_id: u64,
    next_generation: u64,
    next_seq: u64,
}

impl DriverInner {
    fn insert_record(&mut self, id: u64, generation: u64, deadline: u64) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.wheel.insert(Record {
            id,
            generation,
            seq,
            deadline,
        });
        seq
    }
}

/// The process-wide timer: registry + tick thread.
pub(crate) struct TimerDriver {
    inner: Arc<Mutex<DriverInner>>,
    tick: Duration,
    origin: Instant,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl TimerDriver {
    /// Starts the driver and its tick thread.
    pub(crate) fn start(tick: Duration) -> Self {
        let tick = if tick.is_zero() {
            Duration::from_millis(1)
        } else {
            tick
        };
        let origin = Instant::now();
        let inner = Arc::new(Mutex::new(DriverInner {
            wheel: Wheel::new(0),
            active: HashMap::new(),
            next_id: 1,
            next_generation: 1,
            next_seq: 0,
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let inner = Arc::clone(&inner);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("fibril-timer".to_string())
                .spawn(move || tick_loop(&inner, &shutdown, origin, tick))
                .expect("failed to spawn timer thread")
        };

        Self {
            inner,
            tick,
            origin,
            shutdown,
            thread: Mutex::new(Some(thread)),
        }
    }

    fn now_tick(&self) -> u64 {
        ticks_between(self.origin, Instant::now(), self.tick)
    }

    fn delay_ticks(&self, delay: Duration) -> u64 {
        let tick_nanos = self.tick.as_nanos().max(1);
        let ticks = (delay.as_nanos() + tick_nanos - 1) / tick_nanos;
        (ticks as u64).max(1)
    }

    /// Schedules `action` to fire after `delay` (repeating if asked).
    pub(crate) fn schedule(
        &self,
        delay: Duration,
        action: TimerAction,
        repeat: bool,
    ) -> TimerHandle {
        let now = self.now_tick();
        let ticks = self.delay_ticks(delay);

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let seq = inner.insert_record(id, generation, now + ticks);
        inner.active.insert(
            id,
            ActiveTimer {
                generation,
                action,
                delay: ticks,
                repeat,
                expected_seq: seq,
            },
        );
        TimerHandle { id, generation }
    }

    /// Cancels a timer. Returns true if it was live.
    pub(crate) fn cancel(&self, handle: &TimerHandle) -> bool {
        let mut inner = self.inner.lock();
        match inner.active.get(&handle.id) {
            Some(active) if active.generation == handle.generation => {
                inner.active.remove(&handle.id);
                true
            }
            _ => false,
        }
    }

    /// Cancels `handle` and schedules a fresh timer for the same action
    /// and period with a reset deadline, returning the new handle. Returns
    /// `None` if the old handle was already dead.
    pub(crate) fn refresh(&self, handle: &TimerHandle) -> Option<TimerHandle> {
        let now = self.now_tick();

        let mut inner = self.inner.lock();
        let live = matches!(
            inner.active.get(&handle.id),
            Some(active) if active.generation == handle.generation
        );
        if !live {
            return None;
        }
        let old = inner.active.remove(&handle.id).expect("liveness checked");

        let id = inner.next_id;
        inner.next_id += 1;
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let seq = inner.insert_record(id, generation, now + old.delay);
        inner.active.insert(
            id,
            ActiveTimer {
                generation,
                action: old.action,
                delay: old.delay,
                repeat: old.repeat,
                expected_seq: seq,
            },
        );
        Some(TimerHandle { id, generation })
    }

    /// Expires a live timer immediately: its action runs on the calling
    /// thread. A repeating timer is re-armed one period out and keeps its
    /// handle; a one-shot timer is consumed. Returns true if it fired.
    pub(crate) fn fire_now(&self, handle: &TimerHandle) -> bool {
        let now = self.now_tick();
        let action = {
            let mut inner = self.inner.lock();
            let live = matches!(
                inner.active.get(&handle.id),
                Some(active) if active.generation == handle.generation
            );
            if !live {
                return false;
            }

            let period = inner.active[&handle.id].period();
            if let Some(period) = period {
                let seq = inner.insert_record(handle.id, handle.generation, now + period);
                let active = inner.active.get_mut(&handle.id).expect("liveness checked");
                active.expected_seq = seq;
                active.action.clone()
            } else {
                inner
                    .active
                    .remove(&handle.id)
                    .expect("liveness checked")
                    .action
            }
        };
        action.fire();
        true
    }

    /// Number of live timers.
    pub(crate) fn active_count(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Stops the tick thread.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerDriver")
            .field("tick", &self.tick)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

fn ticks_between(origin: Instant, now: Instant, tick: Duration) -> u64 {
    let elapsed = now.saturating_duration_since(origin);
    (elapsed.as_nanos() / tick.as_nanos().max(1)) as u64
}

fn tick_loop(
    inner: &Arc<Mutex<DriverInner>>,
    shutdown: &Arc<AtomicBool>,
    origin: Instant,
    tick: Duration,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let now = ticks_between(origin, Instant::now(), tick);

        let mut actions: Vec<TimerAction> = Vec::new();
        {
            let mut guard = inner.lock();
            guard.wheel.advance_to(now);
            let due = guard.wheel.drain_ready();
            for record in due {
                let live = matches!(
                    guard.active.get(&record.id),
                    Some(active)
                        if active.generation == record.generation
                            && active.expected_seq == record.seq
                );
                if !live {
                    continue;
                }

                let period = guard.active[&record.id].period();
                if let Some(period) = period {
                    let seq =
                        guard.insert_record(record.id, record.generation, record.deadline + period);
                    let active = guard.active.get_mut(&record.id).expect("liveness checked");
                    active.expected_seq = seq;
                    actions.push(active.action.clone());
                } else {
                    let active = guard.active.remove(&record.id).expect("liveness checked");
                    actions.push(active.action);
                }
            }
        }

        for action in actions {
            action.fire();
        }

        std::thread::sleep(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn counter_action(counter: &Arc<AtomicU64>) -> TimerAction {
        let counter = Arc::clone(counter);
        TimerAction::Callback(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn wait_for(counter: &Arc<AtomicU64>, at_least: u64, budget: Duration) -> u64 {
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
    fn one_shot_fires_once() {
        let driver = TimerDriver::start(Duration::from_millis(1));
        let counter = Arc::new(AtomicU64::new(0));
        driver.schedule(Duration::from_millis(10), counter_action(&counter), false);

        let seen = wait_for(&counter, 1, Duration::from_millis(500));
        assert_eq!(seen, 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(driver.active_count(), 0);
        driver.shutdown();
    }

    #[test]
    fn cancel_prevents_fire() {
        let driver = TimerDriver::start(Duration::from_millis(1));
        let counter = Arc::new(AtomicU64::new(0));
        let handle = driver.schedule(Duration::from_millis(30), counter_action(&counter), false);

        assert!(driver.cancel(&handle));
        assert!(!driver.cancel(&handle));

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        driver.shutdown();
    }

    #[test]
    fn repeating_timer_fires_repeatedly_until_cancelled() {
        let driver = TimerDriver::start(Duration::from_millis(1));
        let counter = Arc::new(AtomicU64::new(0));
        let handle = driver.schedule(Duration::from_millis(5), counter_action(&counter), true);

        let seen = wait_for(&counter, 3, Duration::from_secs(2));
        assert!(seen >= 3, "expected at least 3 fires, saw {seen}");

        assert!(driver.cancel(&handle));
        let frozen = counter.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));
        assert!(counter.load(Ordering::SeqCst) <= frozen + 1);
        driver.shutdown();
    }

    #[test]
    fn refresh_cancels_old_handle_and_fires_once() {
        let driver = TimerDriver::start(Duration::from_millis(1));
        let counter = Arc::new(AtomicU64::new(0));
        let handle = driver.schedule(Duration::from_millis(200), counter_action(&counter), false);

        std::thread::sleep(Duration::from_millis(50));
        let refreshed = driver.refresh(&handle).expect("timer should be live");
        assert!(!driver.cancel(&handle), "old handle must be dead");

        let seen = wait_for(&counter, 1, Duration::from_secs(2));
        assert_eq!(seen, 1);
        assert!(!driver.cancel(&refreshed), "fired timer is gone");
        driver.shutdown();
    }

    #[test]
    fn fire_now_runs_action_and_consumes_one_shot() {
        let driver = TimerDriver::start(Duration::from_millis(1));
        let counter = Arc::new(AtomicU64::new(0));
        let handle = driver.schedule(Duration::from_secs(60), counter_action(&counter), false);

        assert!(driver.fire_now(&handle));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!driver.fire_now(&handle));
        assert_eq!(driver.active_count(), 0);
        driver.shutdown();
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let driver = TimerDriver::start(Duration::from_millis(1));
        let counter = Arc::new(AtomicU64::new(0));
        let handle = driver.schedule(Duration::from_millis(5), counter_action(&counter), false);

        wait_for(&counter, 1, Duration::from_millis(500));
        assert!(!driver.cancel(&handle));
        driver.shutdown();
    }
}
