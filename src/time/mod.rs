//! Time primitives: the timer wheel, sleep, and timeout.
//!
//! All deadlines in the runtime go through one hierarchical timing wheel
//! ticked by a dedicated thread at the configured granularity (1 ms by
//! default). [`sleep`] parks the calling task until its deadline;
//! [`timeout`] races a future against a deadline. The `*_timeout`
//! variants on channels, the condition variable, and the I/O operations
//! are all built on the same wheel.

pub(crate) mod driver;
pub(crate) mod wheel;

pub use driver::TimerHandle;
pub(crate) use driver::{TimerAction, TimerDriver};

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Error returned by [`timeout`] when the deadline elapses first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deadline elapsed")]
pub struct Elapsed;

/// Schedules `callback` to run after `delay` on the timer thread,
/// repeatedly if `repeat` is set.
///
/// Callbacks must be short and non-blocking: wake a task or flip a
/// flag, never run application logic inline.
pub fn schedule(
    delay: Duration,
    callback: impl Fn() + Send + Sync + 'static,
    repeat: bool,
) -> TimerHandle {
    crate::runtime::timer_driver().schedule(delay, TimerAction::Callback(Arc::new(callback)), repeat)
}

/// Cancels a scheduled timer; it is skipped at fire time. Safe against
/// a concurrent fire. Returns true if the timer was live.
pub fn cancel(handle: &TimerHandle) -> bool {
    crate::runtime::timer_driver().cancel(handle)
}

/// Cancels `handle` and returns a new handle for the same callback with
/// a reset deadline, or `None` if the timer was already dead.
pub fn refresh(handle: &TimerHandle) -> Option<TimerHandle> {
    crate::runtime::timer_driver().refresh(handle)
}

/// Expires a live timer immediately on the calling thread. A repeating
/// timer is re-armed one period out; a one-shot timer is consumed.
/// Returns true if it fired.
pub fn fire_now(handle: &TimerHandle) -> bool {
    crate::runtime::timer_driver().fire_now(handle)
}

/// Suspends the current task for at least `duration`.
///
/// Resolution is bounded by the timer tick (1 ms by default); a zero
/// duration completes without suspending.
#[must_use = "futures do nothing unless awaited"]
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        duration,
        shared: None,
        handle: None,
    }
}

struct SleepShared {
    fired: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

/// Future returned by [`sleep`].
pub struct Sleep {
    duration: Duration,
    shared: Option<Arc<SleepShared>>,
    handle: Option<TimerHandle>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if let Some(shared) = &self.shared {
            if shared.fired.load(Ordering::Acquire) {
                return Poll::Ready(());
            }
            *shared.waker.lock() = Some(cx.waker().clone());
            // The timer may have fired between the check and the waker
            // update; re-check so the wake is never lost.
            if shared.fired.load(Ordering::Acquire) {
                return Poll::Ready(());
            }
            return Poll::Pending;
        }

        if self.duration.is_zero() {
            return Poll::Ready(());
        }

        let shared = Arc::new(SleepShared {
            fired: AtomicBool::new(false),
            waker: Mutex::new(Some(cx.waker().clone())),
        });
        let timer_shared = Arc::clone(&shared);
        let handle = crate::runtime::timer_driver().schedule(
            self.duration,
            TimerAction::Callback(Arc::new(move || {
                timer_shared.fired.store(true, Ordering::Release);
                if let Some(waker) = timer_shared.waker.lock().take() {
                    waker.wake();
                }
            })),
            false,
        );
        self.shared = Some(shared);
        self.handle = Some(handle);
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let (Some(shared), Some(handle)) = (&self.shared, &self.handle) {
            if !shared.fired.load(Ordering::Acquire) {
                crate::runtime::timer_driver().cancel(handle);
            }
        }
    }
}

impl std::fmt::Debug for Sleep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sleep")
            .field("duration", &self.duration)
            .field("armed", &self.shared.is_some())
            .finish()
    }
}

/// Awaits `future` for at most `duration`.
///
/// Returns `Err(Elapsed)` if the deadline fires first; the inner future
/// is dropped in that case.
pub async fn timeout<F: Future>(duration: Duration, future: F) -> Result<F::Output, Elapsed> {
    let mut future = Box::pin(future);
    let mut deadline = Box::pin(sleep(duration));

    std::future::poll_fn(move |cx| {
        if let Poll::Ready(value) = future.as_mut().poll(cx) {
            return Poll::Ready(Ok(value));
        }
        if deadline.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(Elapsed));
        }
        Poll::Pending
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::time::Instant;

    #[test]
    fn sleep_waits_roughly_the_requested_time() {
        init_test_logging();
        let start = Instant::now();
        crate::block_on(sleep(Duration::from_millis(30)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(25), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "slept {elapsed:?}");
    }

    #[test]
    fn zero_sleep_completes_immediately() {
        init_test_logging();
        let start = Instant::now();
        crate::block_on(sleep(Duration::ZERO));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn timeout_returns_value_when_future_wins() {
        init_test_logging();
        let result = crate::block_on(timeout(Duration::from_millis(500), async { 9 }));
        assert_eq!(result, Ok(9));
    }

    #[test]
    fn timeout_elapses_on_slow_future() {
        init_test_logging();
        let result = crate::block_on(timeout(
            Duration::from_millis(30),
            sleep(Duration::from_secs(10)),
        ));
        assert_eq!(result, Err(Elapsed));
    }
}
