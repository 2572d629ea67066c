//! Global injection queue.
//!
//! A thread-safe unbounded FIFO for woken tasks and for tasks that cannot
//! be locally scheduled.

use crate::task::Task;
use crossbeam_queue::SegQueue;
use std::sync::Arc;

/// A global task queue.
#[derive(Debug, Default)]
pub(crate) struct GlobalQueue {
    inner: SegQueue<Arc<Task>>,
}

impl GlobalQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, task: Arc<Task>) {
        self.inner.push(task);
    }

    pub(crate) fn pop(&self) -> Option<Arc<Task>> {
        self.inner.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}
