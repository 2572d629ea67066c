//! Shared helpers for unit and scenario tests.
//!
//! - Consistent tracing-based logging initialization
//! - Phase/completion macros for readable test output
//! - Minimal future drivers (`block_on`, `poll_once`) that do not
//!   require the global runtime

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::task::{Context, Poll, Wake, Waker};

static INIT_LOGGING: Once = Once::new();

/// Initializes test logging with debug-level output.
///
/// Safe to call multiple times; only the first call initializes.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Drives a future to completion on the current thread.
///
/// Uses a thread-parking waker, so futures woken from other threads
/// (timers, the reactor, peer tasks) make progress. Independent of the
/// global runtime.
pub fn block_on<F: Future>(future: F) -> F::Output {
    struct Unparker {
        thread: std::thread::Thread,
        notified: AtomicBool,
    }

    impl Wake for Unparker {
        fn wake(self: Arc<Self>) {
            self.wake_by_ref();
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.notified.store(true, Ordering::Release);
            self.thread.unpark();
        }
    }

    let unparker = Arc::new(Unparker {
        thread: std::thread::current(),
        notified: AtomicBool::new(false),
    });
    let waker = Waker::from(Arc::clone(&unparker));
    let mut cx = Context::from_waker(&waker);
    let mut future = Box::pin(future);

    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => {
                while !unparker.notified.swap(false, Ordering::Acquire) {
                    std::thread::park();
                }
            }
        }
    }
}

/// Polls a future exactly once with a no-op waker.
pub fn poll_once<F: Future + Unpin>(future: &mut F) -> Poll<F::Output> {
    struct Noop;

    impl Wake for Noop {
        fn wake(self: Arc<Self>) {}
    }

    let waker = Waker::from(Arc::new(Noop));
    let mut cx = Context::from_waker(&waker);
    Pin::new(future).poll(&mut cx)
}

/// Marks the start of a test case in the log stream, so output from
/// worker, timer, and reactor threads can be attributed to it.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(test = %$name, "---- begin {} ----", $name);
    };
}

/// Marks the end of a test case, with optional summary fields.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "---- end {} (ok) ----", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "---- end {} (ok) ----",
            $name
        );
    };
}

/// Asserts after logging the checked values, so a failure in a
/// multi-threaded test still leaves its context in the output.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(check = %$msg, want = ?$expected, got = ?$actual);
        assert!($cond, "{} (want {:?}, got {:?})", $msg, $expected, $actual);
    };
}
