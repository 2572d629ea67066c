//! Work-stealing scheduler.
//!
//! N workers each own a local deque (LIFO for the owner, FIFO for
//! thieves) and share a global injection queue. A worker's loop: pop
//! local, pop global, steal from a random peer, park. Newly spawned tasks
//! go to a randomly chosen worker's deque; wakes go through the global
//! queue. Tasks migrate between workers only while sitting in a ready
//! queue.

pub(crate) mod global_queue;
pub(crate) mod local_queue;
pub(crate) mod stealing;
pub(crate) mod worker;

use crate::config::RuntimeConfig;
use crate::task::{Task, TaskState};
use global_queue::GlobalQueue;
use local_queue::LocalQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use worker::{Parker, Worker};

/// Shared scheduler state: queues, worker handles, and the counters used
/// for quiescence detection.
pub(crate) struct Scheduler {
    handles: Vec<WorkerHandle>,
    global: GlobalQueue,
    /// Tasks spawned and not yet completed.
    live: AtomicUsize,
    /// Tasks currently being polled.
    running: AtomicUsize,
    shutdown: AtomicBool,
    spawn_seed: AtomicU64,
    next_unpark: AtomicUsize,
}

pub(crate) struct WorkerHandle {
    local: LocalQueue,
    parker: Parker,
}

impl Scheduler {
    /// Builds the shared state and the per-thread [`Worker`] values.
    pub(crate) fn new(config: &RuntimeConfig) -> (Arc<Self>, Vec<Worker>) {
        let count = config.worker_threads.max(1);
        let locals: Vec<LocalQueue> = (0..count).map(|_| LocalQueue::new()).collect();
        let parkers: Vec<Parker> = (0..count).map(|_| Parker::new()).collect();

        let handles = locals
            .iter()
            .zip(&parkers)
            .map(|(local, parker)| WorkerHandle {
                local: local.clone(),
                parker: parker.clone(),
            })
            .collect();

        let shared = Arc::new(Self {
            handles,
            global: GlobalQueue::new(),
            live: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            spawn_seed: AtomicU64::new(0x51_7C_C1_B7),
            next_unpark: AtomicUsize::new(0),
        });

        let workers = locals
            .into_iter()
            .zip(parkers)
            .enumerate()
            .map(|(id, (local, parker))| {
                let stealers = shared
                    .handles
                    .iter()
                    .enumerate()
                    .filter(|(peer, _)| *peer != id)
                    .map(|(_, handle)| handle.local.stealer())
                    .collect();
                Worker::new(id, local, stealers, parker, Arc::clone(&shared))
            })
            .collect();

        (shared, workers)
    }

    pub(crate) fn global(&self) -> &GlobalQueue {
        &self.global
    }

    /// Enqueues a freshly spawned task on a randomly chosen worker's deque
    /// and unparks that worker.
    pub(crate) fn spawn_task(&self, task: Arc<Task>) {
        self.live.fetch_add(1, Ordering::SeqCst);
        task.set_state(TaskState::Ready);
        // try_mark_queued always succeeds for a new task.
        let _ = task.try_mark_queued();

        let seed = self.spawn_seed.fetch_add(0x9E37_79B9, Ordering::Relaxed);
        let idx = (crate::util::DetRng::new(seed).next_u64() % self.handles.len() as u64) as usize;
        let handle = &self.handles[idx];
        handle.local.push(task);
        handle.parker.unpark();
    }

    /// Pushes a woken task to the global queue and unparks one worker.
    pub(crate) fn inject(&self, task: Arc<Task>) {
        self.global.push(task);
        self.unpark_one();
    }

    fn unpark_one(&self) {
        let idx = self.next_unpark.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        self.handles[idx].parker.unpark();
    }

    pub(crate) fn unpark_all(&self) {
        for handle in &self.handles {
            handle.parker.unpark();
        }
    }

    pub(crate) fn running_inc(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn running_dec(&self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn task_finished(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of tasks sitting in ready queues.
    pub(crate) fn ready_count(&self) -> usize {
        self.global.len() + self.handles.iter().map(|h| h.local.len()).sum::<usize>()
    }

    /// Number of tasks currently being polled.
    pub(crate) fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of spawned, not-yet-completed tasks.
    pub(crate) fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.unpark_all();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.handles.len())
            .field("ready", &self.ready_count())
            .field("live", &self.live_count())
            .finish_non_exhaustive()
    }
}

/// Spawns the worker OS threads for a built scheduler.
pub(crate) fn start_workers(
    workers: Vec<Worker>,
    config: &RuntimeConfig,
) -> std::io::Result<Vec<std::thread::JoinHandle<()>>> {
    let mut join_handles = Vec::with_capacity(workers.len());
    for mut worker in workers {
        let name = format!("{}-{}", config.thread_name_prefix, worker.id);
        let handle = std::thread::Builder::new()
            .name(name)
            .stack_size(config.worker_stack_bytes)
            .spawn(move || worker.run_loop())?;
        join_handles.push(handle);
    }
    Ok(join_handles)
}
