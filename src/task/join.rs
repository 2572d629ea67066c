//! Join handles for spawned tasks.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

struct JoinState<T> {
    result: Option<T>,
    waker: Option<Waker>,
}

/// A handle to await the output of a spawned task.
///
/// There is no asynchronous exception channel: if the task panics, the
/// panic is caught at the task boundary and the handle never resolves.
/// Arrange a channel or wait-group to observe task outcomes that may fail.
pub struct JoinHandle<T> {
    state: Arc<Mutex<JoinState<T>>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new_pair() -> (Self, JoinSender<T>) {
        let state = Arc::new(Mutex::new(JoinState {
            result: None,
            waker: None,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            JoinSender { state },
        )
    }

    /// Returns true if the task has produced its output.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.lock().result.is_some()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = self.state.lock();
        match guard.result.take() {
            Some(value) => Poll::Ready(value),
            None => {
                guard.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Completion side of a [`JoinHandle`]; consumed by the task wrapper.
pub(crate) struct JoinSender<T> {
    state: Arc<Mutex<JoinState<T>>>,
}

impl<T> JoinSender<T> {
    pub(crate) fn complete(self, value: T) {
        let waker = {
            let mut guard = self.state.lock();
            guard.result = Some(value);
            guard.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_reports_finished_after_complete() {
        let (handle, sender) = JoinHandle::new_pair();
        assert!(!handle.is_finished());
        sender.complete(5_u32);
        assert!(handle.is_finished());
    }

    #[test]
    fn handle_resolves_to_value() {
        let (handle, sender) = JoinHandle::new_pair();
        sender.complete("done");
        let value = crate::test_utils::block_on(handle);
        assert_eq!(value, "done");
    }
}
