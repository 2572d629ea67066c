//! Explicitly driven coroutines.
//!
//! [`Coroutine`] is the create-then-resume counterpart to
//! [`spawn`](crate::runtime::spawn): the task is created without being
//! scheduled, and the caller drives it one suspension at a time on the
//! current thread. Useful for deterministic tests where interleaving must
//! be controlled by hand.

use crate::task::TaskId;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

/// Lifecycle state of a [`Coroutine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// Created, never resumed.
    Created,
    /// Resumed at least once; parked at a suspension point.
    Suspended,
    /// Ran to completion; the output has been taken.
    Completed,
}

/// Outcome of a single [`Coroutine::resume`] call.
#[derive(Debug)]
pub enum Resume<T> {
    /// The coroutine hit a suspension point; resume again to continue.
    Suspended,
    /// The coroutine finished with this value.
    Complete(T),
}

impl<T> Resume<T> {
    /// Returns true if the coroutine finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// A task created without scheduling, driven by explicit `resume` calls.
///
/// Unlike a spawned task, a coroutine never touches the run queues: each
/// `resume` runs the task on the calling thread until the next suspension
/// point. Events that would wake a spawned task (timers, channel sends)
/// do not resume a coroutine; only the owner does.
pub struct Coroutine<T> {
    id: TaskId,
    state: CoroutineState,
    future: Pin<Box<dyn Future<Output = T>>>,
}

impl<T> Coroutine<T> {
    /// Creates a coroutine from a future without scheduling it.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self {
            id: TaskId::next(),
            state: CoroutineState::Created,
            future: Box::pin(future),
        }
    }

    /// Returns this coroutine's task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the coroutine's lifecycle state.
    #[must_use]
    pub fn state(&self) -> CoroutineState {
        self.state
    }

    /// Runs the coroutine until its next suspension point.
    ///
    /// A panic inside the coroutine propagates to the caller.
    ///
    /// # Panics
    ///
    /// Panics if called after the coroutine completed.
    pub fn resume(&mut self) -> Resume<T> {
        assert!(
            self.state != CoroutineState::Completed,
            "resume on a completed coroutine"
        );

        let _current = crate::task::enter(self.id);
        let waker = manual_waker();
        let mut cx = Context::from_waker(&waker);

        match self.future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => {
                self.state = CoroutineState::Completed;
                Resume::Complete(value)
            }
            Poll::Pending => {
                self.state = CoroutineState::Suspended;
                Resume::Suspended
            }
        }
    }
}

impl<T> std::fmt::Debug for Coroutine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

/// The resume driver ignores wakes: progress is owned by the caller.
struct ManualWaker;

impl Wake for ManualWaker {
    fn wake(self: Arc<Self>) {}
}

fn manual_waker() -> Waker {
    Waker::from(Arc::new(ManualWaker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_to_completion_without_suspension() {
        let mut coroutine = Coroutine::new(async { 2 + 2 });
        assert_eq!(coroutine.state(), CoroutineState::Created);
        match coroutine.resume() {
            Resume::Complete(v) => assert_eq!(v, 4),
            Resume::Suspended => panic!("expected completion"),
        }
        assert_eq!(coroutine.state(), CoroutineState::Completed);
    }

    #[test]
    fn yield_suspends_then_completes() {
        let mut coroutine = Coroutine::new(async {
            crate::runtime::yield_now().await;
            7
        });
        assert!(!coroutine.resume().is_complete());
        assert_eq!(coroutine.state(), CoroutineState::Suspended);
        match coroutine.resume() {
            Resume::Complete(v) => assert_eq!(v, 7),
            Resume::Suspended => panic!("expected completion on second resume"),
        }
    }

    #[test]
    fn current_task_is_set_during_resume() {
        let mut coroutine = Coroutine::new(async { crate::task::current() });
        let id = coroutine.id();
        match coroutine.resume() {
            Resume::Complete(seen) => assert_eq!(seen, Some(id)),
            Resume::Suspended => panic!("expected completion"),
        }
    }

    #[test]
    #[should_panic(expected = "resume on a completed coroutine")]
    fn resume_after_complete_panics() {
        let mut coroutine = Coroutine::new(async { 1 });
        let _ = coroutine.resume();
        let _ = coroutine.resume();
    }
}
