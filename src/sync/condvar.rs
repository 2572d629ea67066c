//! Task-cooperative condition variable.
//!
//! [`Condvar::wait`] atomically parks the task on the condition's wait
//! queue and releases the supplied mutex guard; the mutex is re-acquired
//! before the wait resolves. Wakeups are FIFO among waiters. A timed wait
//! races a wheel timer against `notify`; the waiter's state word settles
//! the race, so a late notify after a timeout (or a late timer fire after
//! a notify) is a no-op.

use crate::sync::mutex::MutexGuard;
use crate::sync::wait_queue::{AwaitNode, WaitQueue, TIMED_OUT};
use crate::time::TimerAction;
use std::sync::Arc;
use std::time::Duration;

/// Whether a timed wait returned because the deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeoutResult {
    timed_out: bool,
}

impl WaitTimeoutResult {
    /// Returns true if the wait ended by timeout rather than notify.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

/// A condition variable for use with [`Mutex`](crate::sync::Mutex).
#[derive(Debug, Default)]
pub struct Condvar {
    queue: WaitQueue,
}

impl Condvar {
    /// Creates a new condition variable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases `guard` and parks until notified, then re-acquires the
    /// mutex.
    pub async fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard.mutex();
        let node = self.queue.enqueue();
        drop(guard);

        AwaitNode::new(self.queue.clone(), node).await;
        mutex.lock().await
    }

    /// Like [`wait`](Self::wait), with a deadline. The result reports
    /// whether the deadline fired; the mutex is re-acquired either way.
    pub async fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        duration: Duration,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        let mutex = guard.mutex();
        let node = self.queue.enqueue();

        let timer = {
            let queue = self.queue.clone();
            let node = Arc::clone(&node);
            crate::runtime::timer_driver().schedule(
                duration,
                TimerAction::Callback(Arc::new(move || {
                    if node.transition(TIMED_OUT) {
                        queue.remove(node.token());
                        node.wake();
                    }
                })),
                false,
            )
        };
        drop(guard);

        let final_state = AwaitNode::new(self.queue.clone(), Arc::clone(&node)).await;
        let timed_out = final_state == TIMED_OUT;
        if !timed_out {
            crate::runtime::timer_driver().cancel(&timer);
        }

        (mutex.lock().await, WaitTimeoutResult { timed_out })
    }

    /// Wakes the first live waiter. Returns true if one was woken.
    pub fn notify_one(&self) -> bool {
        self.queue.notify_one()
    }

    /// Wakes every live waiter. Returns how many were woken.
    pub fn notify_all(&self) -> usize {
        self.queue.notify_all()
    }

    /// Number of parked waiters.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Mutex;
    use crate::test_utils::{block_on, init_test_logging, poll_once};

    #[test]
    fn notify_one_wakes_in_fifo_order() {
        init_test_logging();
        let mutex = Mutex::new(());
        let condvar = Condvar::new();

        let mut first = Box::pin(async {
            let guard = mutex.lock().await;
            let _guard = condvar.wait(guard).await;
            1
        });
        let mut second = Box::pin(async {
            let guard = mutex.lock().await;
            let _guard = condvar.wait(guard).await;
            2
        });

        assert!(poll_once(&mut first).is_pending());
        assert!(poll_once(&mut second).is_pending());
        assert_eq!(condvar.waiters(), 2);

        assert!(condvar.notify_one());
        assert!(poll_once(&mut first).is_ready());
        assert!(poll_once(&mut second).is_pending());

        assert!(condvar.notify_one());
        assert!(poll_once(&mut second).is_ready());
        assert!(!condvar.notify_one());
    }

    #[test]
    fn notify_all_drains() {
        init_test_logging();
        let mutex = Mutex::new(());
        let condvar = Condvar::new();

        let mut waiters: Vec<_> = (0..3)
            .map(|_| {
                Box::pin(async {
                    let guard = mutex.lock().await;
                    let _guard = condvar.wait(guard).await;
                })
            })
            .collect();
        for waiter in &mut waiters {
            assert!(poll_once(waiter).is_pending());
        }

        assert_eq!(condvar.notify_all(), 3);
        for waiter in &mut waiters {
            assert!(poll_once(waiter).is_ready());
        }
    }

    #[test]
    fn wait_releases_the_mutex_while_parked() {
        init_test_logging();
        let mutex = Mutex::new(());
        let condvar = Condvar::new();

        let mut waiter = Box::pin(async {
            let guard = mutex.lock().await;
            let _guard = condvar.wait(guard).await;
        });
        assert!(poll_once(&mut waiter).is_pending());

        // Parked waiter must not hold the lock.
        assert!(!mutex.is_locked());
        let guard = mutex.try_lock().expect("mutex should be free");
        drop(guard);
    }

    #[test]
    fn wait_timeout_times_out_without_notify() {
        init_test_logging();
        let mutex = Mutex::new(());
        let condvar = Condvar::new();

        let result = block_on(async {
            let guard = mutex.lock().await;
            let (_guard, result) = condvar
                .wait_timeout(guard, Duration::from_millis(30))
                .await;
            result
        });
        assert!(result.timed_out());
        assert!(!mutex.is_locked());
    }

    #[test]
    fn notify_before_deadline_wins() {
        init_test_logging();
        let mutex = Arc::new(Mutex::new(()));
        let condvar = Arc::new(Condvar::new());

        let notifier = {
            let condvar = Arc::clone(&condvar);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(40));
                condvar.notify_one();
            })
        };

        let result = block_on(async {
            let guard = mutex.lock().await;
            let (_guard, result) = condvar.wait_timeout(guard, Duration::from_secs(5)).await;
            result
        });
        assert!(!result.timed_out());
        notifier.join().expect("notifier thread");
    }
}
