//! Task-cooperative mutex.
//!
//! Unlike `std::sync::Mutex`, locking suspends the calling task instead
//! of blocking the worker thread, and the guard can be held across await
//! points.
//!
//! # Fairness
//!
//! The mutex is FIFO-fair with direct handoff: on unlock, ownership
//! transfers to the first live waiter without ever releasing the locked
//! flag, so `try_lock` cannot barge in between a release and the woken
//! waiter's first poll.
//!
//! The mutex is non-reentrant. Locking it again from the owning task
//! deadlocks that task.

use crate::sync::wait_queue::{WaitNode, NOTIFIED, TIMED_OUT, WAITING};
use crate::task::TaskId;
use parking_lot::Mutex as PlainMutex;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Error returned by [`Mutex::try_lock`] when the fast path fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("mutex is locked")]
pub struct TryLockError;

#[derive(Debug)]
struct LockState {
    locked: bool,
    owner: Option<TaskId>,
    waiters: VecDeque<Arc<WaitNode>>,
}

/// A task-cooperative mutual exclusion lock.
#[derive(Debug)]
pub struct Mutex<T> {
    state: PlainMutex<LockState>,
    data: UnsafeCell<T>,
}

// SAFETY: the locked flag plus FIFO handoff guarantee at most one guard
// exists at a time, so access to the cell is exclusive.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new unlocked mutex.
    pub fn new(value: T) -> Self {
        Self {
            state: PlainMutex::new(LockState {
                locked: false,
                owner: None,
                waiters: VecDeque::new(),
            }),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquires the mutex, suspending the task while it is held elsewhere.
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            node: None,
        }
    }

    /// Fast path only: acquires the mutex if it is unlocked and
    /// uncontended.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, TryLockError> {
        let mut state = self.state.lock();
        let contended = state.waiters.iter().any(|n| n.is_waiting());
        if state.locked || contended {
            return Err(TryLockError);
        }
        state.locked = true;
        state.owner = crate::task::current();
        drop(state);
        Ok(MutexGuard { mutex: self })
    }

    /// Returns true if the mutex is currently held.
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Returns true if the current task holds the mutex.
    pub fn is_locked_by_current(&self) -> bool {
        let state = self.state.lock();
        state.locked && state.owner.is_some() && state.owner == crate::task::current()
    }

    /// Number of tasks parked on the mutex.
    pub fn waiters(&self) -> usize {
        self.state
            .lock()
            .waiters
            .iter()
            .filter(|n| n.is_waiting())
            .count()
    }

    /// Returns a mutable reference to the data; no locking needed with
    /// exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the mutex, returning the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    /// Releases the lock: direct handoff to the first live waiter, or a
    /// plain unlock when nobody waits.
    fn release(&self) {
        let mut state = self.state.lock();
        state.owner = None;
        loop {
            match state.waiters.pop_front() {
                Some(node) => {
                    if node.transition(NOTIFIED) {
                        // Handoff: `locked` stays true; the woken waiter
                        // becomes the owner when it resumes.
                        drop(state);
                        node.wake();
                        return;
                    }
                }
                None => {
                    state.locked = false;
                    return;
                }
            }
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Future returned by [`Mutex::lock`].
#[must_use = "futures do nothing unless awaited"]
pub struct Lock<'a, T> {
    mutex: &'a Mutex<T>,
    node: Option<Arc<WaitNode>>,
}

impl<'a, T> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(node) = &self.node {
            match node.state() {
                NOTIFIED => {
                    self.mutex.state.lock().owner = crate::task::current();
                    self.node = None;
                    return Poll::Ready(MutexGuard { mutex: self.mutex });
                }
                WAITING => {
                    node.set_waker(cx.waker());
                    if node.state() == NOTIFIED {
                        self.mutex.state.lock().owner = crate::task::current();
                        self.node = None;
                        return Poll::Ready(MutexGuard { mutex: self.mutex });
                    }
                    return Poll::Pending;
                }
                // The node can only be claimed by `release`; no timer
                // ever targets a bare lock wait.
                other => unreachable!("unexpected lock waiter state {other}"),
            }
        }

        let mut state = self.mutex.state.lock();
        let contended = state.waiters.iter().any(|n| n.is_waiting());
        if !state.locked && !contended {
            state.locked = true;
            state.owner = crate::task::current();
            drop(state);
            return Poll::Ready(MutexGuard { mutex: self.mutex });
        }

        let node = WaitNode::new();
        node.set_waker(cx.waker());
        state.waiters.push_back(Arc::clone(&node));
        self.node = Some(node);
        Poll::Pending
    }
}

impl<T> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        let Some(node) = self.node.take() else {
            return;
        };
        if node.transition(TIMED_OUT) {
            // Still queued: unhook so release skips it.
            let mut state = self.mutex.state.lock();
            let token = node.token();
            state.waiters.retain(|n| n.token() != token);
            return;
        }
        if node.state() == NOTIFIED {
            // The lock was handed to us after the future was abandoned;
            // pass it on so it is not leaked.
            self.mutex.release();
        }
    }
}

/// RAII guard; releasing is the direct-handoff unlock.
#[must_use = "the lock releases immediately if the guard is dropped"]
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<'a, T> MutexGuard<'a, T> {
    pub(crate) fn mutex(&self) -> &'a Mutex<T> {
        self.mutex
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a guard proves exclusive ownership of the cell.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: a guard proves exclusive ownership of the cell.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexGuard").field("data", &**self).finish()
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}
