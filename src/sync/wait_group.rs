//! Go-style wait group.
//!
//! A counter plus a wait queue: [`WaitGroup::wait`] parks while the
//! counter is positive; the decrement that reaches zero drains every
//! waiter. Handles are cheap clones sharing one counter, so a task can
//! carry its own handle and call [`done`](WaitGroup::done) when it
//! finishes.

use crate::sync::wait_queue::{WaitNode, WaitQueue, WAITING};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Error returned when an `add` would drive the counter negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait group counter would go negative")]
pub struct WaitGroupUnderflow;

#[derive(Debug, Default)]
struct Inner {
    count: Mutex<i64>,
    queue: WaitQueue,
}

/// Waits for a collection of tasks to finish.
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<Inner>,
}

impl WaitGroup {
    /// Creates a wait group with a zero counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjusts the counter by `delta`.
    ///
    /// # Panics
    ///
    /// Panics if the adjustment would make the counter negative.
    pub fn add(&self, delta: i64) {
        self.try_add(delta).expect("wait group counter underflow");
    }

    /// Adjusts the counter by `delta`, rejecting underflow.
    pub fn try_add(&self, delta: i64) -> Result<(), WaitGroupUnderflow> {
        let drained = {
            let mut count = self.inner.count.lock();
            let next = *count + delta;
            if next < 0 {
                return Err(WaitGroupUnderflow);
            }
            *count = next;
            next == 0 && delta < 0
        };
        if drained {
            self.inner.queue.notify_all();
        }
        Ok(())
    }

    /// Marks one task complete; equivalent to `add(-1)`.
    pub fn done(&self) {
        self.add(-1);
    }

    /// Returns the current counter value.
    #[must_use]
    pub fn count(&self) -> i64 {
        *self.inner.count.lock()
    }

    /// Parks until the counter reaches zero. Returns immediately if it
    /// already is zero.
    pub fn wait(&self) -> Wait {
        Wait {
            group: self.clone(),
            node: None,
        }
    }
}

/// Future returned by [`WaitGroup::wait`].
#[must_use = "futures do nothing unless awaited"]
pub struct Wait {
    group: WaitGroup,
    node: Option<Arc<WaitNode>>,
}

impl Future for Wait {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if let Some(node) = &self.node {
            if node.state() != WAITING {
                self.node = None;
                return Poll::Ready(());
            }
            node.set_waker(cx.waker());
            if node.state() != WAITING {
                self.node = None;
                return Poll::Ready(());
            }
            return Poll::Pending;
        }

        // Register under the counter lock so a concurrent final `done`
        // cannot slip between the check and the enqueue.
        let count = self.group.inner.count.lock();
        if *count <= 0 {
            return Poll::Ready(());
        }
        let node = self.group.inner.queue.enqueue();
        node.set_waker(cx.waker());
        drop(count);

        self.node = Some(node);
        Poll::Pending
    }
}

impl Drop for Wait {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            if node.transition(crate::sync::wait_queue::TIMED_OUT) {
                self.group.inner.queue.remove(node.token());
            }
        }
    }
}
