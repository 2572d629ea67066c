//! Per-worker local queue.
//!
//! A lock-based deque: the owning worker pushes and pops at the tail
//! (LIFO, cache-friendly), thieves steal from the head (FIFO). The short
//! critical sections keep push, pop, and steal non-blocking in practice.

use crate::task::Task;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A local run queue for one worker.
///
/// The handle is cheaply cloneable so the scheduler can push newly spawned
/// tasks directly onto a chosen worker's deque.
#[derive(Debug, Clone, Default)]
pub(crate) struct LocalQueue {
    inner: Arc<Mutex<VecDeque<Arc<Task>>>>,
}

impl LocalQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pushes a task at the tail.
    pub(crate) fn push(&self, task: Arc<Task>) {
        self.inner.lock().push_back(task);
    }

    /// Pops a task from the tail (LIFO).
    pub(crate) fn pop(&self) -> Option<Arc<Task>> {
        self.inner.lock().pop_back()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Creates a stealer handle for this queue.
    pub(crate) fn stealer(&self) -> Stealer {
        Stealer {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A handle to steal tasks from another worker's queue.
#[derive(Debug, Clone)]
pub(crate) struct Stealer {
    inner: Arc<Mutex<VecDeque<Arc<Task>>>>,
}

impl Stealer {
    /// Steals one task from the head (FIFO).
    pub(crate) fn steal(&self) -> Option<Arc<Task>> {
        self.inner.lock().pop_front()
    }
}
