//! Worker thread logic.

use crate::runtime::scheduler::local_queue::{LocalQueue, Stealer};
use crate::runtime::scheduler::{stealing, Scheduler};
use crate::task::{Task, TaskState};
use crate::util::DetRng;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

/// Identifier for a scheduler worker.
pub(crate) type WorkerId = usize;

/// How long an idle worker sleeps before re-checking the queues.
const PARK_INTERVAL: Duration = Duration::from_millis(50);

/// A worker thread that executes tasks.
pub(crate) struct Worker {
    pub(crate) id: WorkerId,
    pub(crate) local: LocalQueue,
    pub(crate) stealers: Vec<Stealer>,
    pub(crate) parker: Parker,
    pub(crate) shared: Arc<Scheduler>,
    rng: DetRng,
}

impl Worker {
    pub(crate) fn new(
        id: WorkerId,
        local: LocalQueue,
        stealers: Vec<Stealer>,
        parker: Parker,
        shared: Arc<Scheduler>,
    ) -> Self {
        Self {
            id,
            local,
            stealers,
            parker,
            shared,
            rng: DetRng::new(id as u64 + 1),
        }
    }

    /// Runs the scheduling loop: local (LIFO), then global, then steal,
    /// then park.
    pub(crate) fn run_loop(&mut self) {
        while !self.shared.is_shutdown() {
            if let Some(task) = self.local.pop() {
                self.execute(&task);
                continue;
            }

            if let Some(task) = self.shared.global().pop() {
                self.execute(&task);
                continue;
            }

            if let Some(task) = stealing::steal_task(&self.stealers, &mut self.rng) {
                self.execute(&task);
                continue;
            }

            self.parker.park_timeout(PARK_INTERVAL);
        }
    }

    fn execute(&self, task: &Arc<Task>) {
        // Another worker may be polling this task right now (a wake landed
        // mid-poll and produced a second queue entry). The future mutex is
        // the ownership token: losing the race simply drops this entry.
        let Some(mut slot) = task.future().try_lock() else {
            return;
        };
        if slot.is_none() {
            return;
        }

        // Consume the pending notification only once we own the poll.
        task.clear_queued();
        task.set_state(TaskState::Running);
        self.shared.running_inc();

        tracing::trace!(task_id = %task.id(), worker_id = self.id, "polling task");

        let waker = Waker::from(Arc::new(TaskWaker {
            task: Arc::clone(task),
            shared: Arc::clone(&self.shared),
        }));
        let mut cx = Context::from_waker(&waker);
        let _current = crate::task::enter(task.id());

        let poll = {
            let future = slot.as_mut().expect("future slot checked above");
            catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
        };

        self.shared.running_dec();

        match poll {
            Ok(Poll::Ready(())) => {
                *slot = None;
                task.set_state(TaskState::Completed);
                drop(slot);
                self.shared.task_finished();
            }
            Ok(Poll::Pending) => {
                task.set_state(TaskState::Suspended);
                drop(slot);
                // A wake that landed during the poll may have had its queue
                // entry consumed by a worker that lost the mutex race above;
                // re-inject so the notification cannot be lost.
                if task.is_queued() {
                    self.shared.inject(Arc::clone(task));
                }
            }
            Err(panic) => {
                *slot = None;
                task.set_state(TaskState::Completed);
                drop(slot);
                let msg = panic_message(&panic);
                tracing::error!(task_id = %task.id(), panic = %msg, "task panicked");
                self.shared.task_finished();
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

/// Waker for a scheduled task: dedups wakes and re-queues via the
/// scheduler's injection path.
struct TaskWaker {
    task: Arc<Task>,
    shared: Arc<Scheduler>,
}

impl TaskWaker {
    fn schedule(&self) {
        if self.task.is_completed() {
            return;
        }
        if self.task.try_mark_queued() {
            self.task.set_state(TaskState::Ready);
            self.shared.inject(Arc::clone(&self.task));
        }
    }
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

/// Parking mechanism for idle workers.
#[derive(Debug, Clone)]
pub(crate) struct Parker {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Parks the current thread until notified or the timeout elapses.
    pub(crate) fn park_timeout(&self, duration: Duration) {
        let (lock, cvar) = &*self.inner;
        let mut notified = lock.lock().expect("parker lock poisoned");
        if !*notified {
            let (guard, _) = cvar
                .wait_timeout(notified, duration)
                .expect("parker lock poisoned");
            notified = guard;
        }
        *notified = false;
    }

    /// Unparks a parked worker.
    pub(crate) fn unpark(&self) {
        let (lock, cvar) = &*self.inner;
        {
            let mut notified = lock.lock().expect("parker lock poisoned");
            *notified = true;
        }
        cvar.notify_one();
    }
}

impl Default for Parker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn unpark_before_park_returns_immediately() {
        let parker = Parker::new();
        parker.unpark();
        let start = Instant::now();
        parker.park_timeout(Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn park_timeout_elapses() {
        let parker = Parker::new();
        let start = Instant::now();
        parker.park_timeout(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn unpark_wakes_parked_thread() {
        let parker = Parker::new();
        let remote = parker.clone();
        let handle = std::thread::spawn(move || {
            remote.park_timeout(Duration::from_secs(5));
        });
        std::thread::sleep(Duration::from_millis(20));
        parker.unpark();
        handle.join().expect("parked thread should wake");
    }
}
