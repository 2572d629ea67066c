//! Task identity, state, and the core task record.
//!
//! A task is a first-class suspendable unit of execution: a boxed future,
//! a monotonically assigned [`TaskId`], and a state machine. At any instant
//! a task is owned by exactly one container: a run queue, the waker of a
//! blocking primitive, or the worker currently polling it.

mod coroutine;
mod join;

pub use coroutine::{Coroutine, CoroutineState, Resume};
pub use join::JoinHandle;
pub(crate) use join::JoinSender;

use parking_lot::Mutex;
use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Unique identifier for a task, monotonically assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of this id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Created but not yet enqueued.
    Created = 0,
    /// In a run queue, waiting for a worker.
    Ready = 1,
    /// Currently executing on a worker.
    Running = 2,
    /// Parked on a wait queue, timer, or fd.
    Suspended = 3,
    /// Entry future returned (or panicked); resources released.
    Completed = 4,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::Suspended,
            _ => Self::Completed,
        }
    }
}

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The shared task record.
///
/// The future slot doubles as the completion marker: once the task
/// finishes the slot is emptied, and any stale run-queue entry that still
/// references the record becomes a no-op.
pub(crate) struct Task {
    id: TaskId,
    state: AtomicU8,
    /// Wake dedup flag: set by wakers, cleared by the worker before a poll.
    queued: AtomicBool,
    future: Mutex<Option<TaskFuture>>,
}

impl Task {
    pub(crate) fn new(future: TaskFuture) -> Self {
        Self {
            id: TaskId::next(),
            state: AtomicU8::new(TaskState::Created as u8),
            queued: AtomicBool::new(false),
            future: Mutex::new(Some(future)),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Claims the right to enqueue this task. Returns false if it is
    /// already queued (the wake is coalesced).
    pub(crate) fn try_mark_queued(&self) -> bool {
        self.queued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }

    pub(crate) fn is_queued(&self) -> bool {
        self.queued.load(Ordering::Acquire)
    }

    pub(crate) fn future(&self) -> &Mutex<Option<TaskFuture>> {
        &self.future
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.state() == TaskState::Completed
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

thread_local! {
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
}

/// Returns the id of the task currently executing on this thread, if any.
#[must_use]
pub fn current() -> Option<TaskId> {
    CURRENT_TASK.with(Cell::get)
}

/// Marks `id` as the current task for the scope of the returned guard.
pub(crate) fn enter(id: TaskId) -> CurrentTaskGuard {
    let previous = CURRENT_TASK.with(|cell| cell.replace(Some(id)));
    CurrentTaskGuard { previous }
}

pub(crate) struct CurrentTaskGuard {
    previous: Option<TaskId>,
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|cell| cell.set(self.previous));
    }
}
