//! The runtime: scheduler, reactor, timer, and the process-wide
//! singleton.
//!
//! The runtime is started lazily the first time any component needs it
//! and lives until process exit. [`spawn`] enqueues a task for the
//! worker pool; [`block_on`] drives a future on the calling thread;
//! [`yield_now`] re-queues the current task as a scheduling hint.
//!
//! [`Runtime::shutdown`] blocks until the runtime is quiescent (no
//! ready tasks, nothing mid-poll, and no reactor waiters), then stops
//! the worker, reactor, and timer threads. Tasks parked on primitives
//! with no pending event are abandoned, as at process exit.

pub(crate) mod reactor;
pub(crate) mod scheduler;

use crate::config::RuntimeConfig;
use crate::error::{Error, ErrorKind};
use crate::task::{JoinHandle, Task, TaskId};
use crate::time::TimerDriver;
use parking_lot::Mutex;
use reactor::Reactor;
use scheduler::Scheduler;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

static GLOBAL: OnceLock<Runtime> = OnceLock::new();

/// The runtime instance: worker pool, reactor, and timer.
pub struct Runtime {
    scheduler: Arc<Scheduler>,
    reactor: Arc<Reactor>,
    timer: Arc<TimerDriver>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
    config: RuntimeConfig,
    stopped: AtomicBool,
}

impl Runtime {
    /// Returns the process-wide runtime, starting it with defaults (plus
    /// `FIBRIL_*` environment overrides) on first use.
    pub fn global() -> &'static Runtime {
        GLOBAL.get_or_init(|| {
            Self::start(RuntimeConfig::default().with_env_overrides())
                .expect("failed to start the global runtime")
        })
    }

    /// Installs the process-wide runtime with an explicit configuration.
    ///
    /// Fails if the singleton was already started.
    pub fn init(config: RuntimeConfig) -> crate::Result<&'static Runtime> {
        let mut fresh = false;
        let runtime = GLOBAL.get_or_init(|| {
            fresh = true;
            Self::start(config.clone()).expect("failed to start the global runtime")
        });
        if fresh {
            Ok(runtime)
        } else {
            Err(Error::new(ErrorKind::RuntimeStarted)
                .with_context("global runtime already running"))
        }
    }

    fn start(mut config: RuntimeConfig) -> std::io::Result<Self> {
        config.normalize();
        tracing::debug!(
            workers = config.worker_threads,
            stack_bytes = config.worker_stack_bytes,
            tick_ms = config.timer_tick.as_millis() as u64,
            backlog = config.reactor_event_backlog,
            "starting runtime"
        );

        let (scheduler, worker_values) = Scheduler::new(&config);
        let workers = scheduler::start_workers(worker_values, &config)?;
        let reactor = Arc::new(Reactor::start(config.reactor_event_backlog)?);
        let timer = Arc::new(TimerDriver::start(config.timer_tick));

        Ok(Self {
            scheduler,
            reactor,
            timer,
            workers: Mutex::new(workers),
            config,
            stopped: AtomicBool::new(false),
        })
    }

    /// Returns the runtime configuration in effect.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Spawns a task; it starts running as soon as any worker picks it
    /// up. The caller does not wait.
    ///
    /// # Panics
    ///
    /// Panics if the runtime has been shut down.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        assert!(
            !self.stopped.load(Ordering::SeqCst),
            "spawn on a shut-down runtime"
        );

        let (handle, sender) = JoinHandle::new_pair();
        let wrapped = async move {
            sender.complete(future.await);
        };
        let task = Arc::new(Task::new(Box::pin(wrapped)));
        tracing::trace!(task_id = %task.id(), "spawning task");
        self.scheduler.spawn_task(task);
        handle
    }

    /// Runs a future to completion on the calling thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let _current = crate::task::enter(TaskId::next());

        let mut future = Box::pin(future);
        let unparker = Arc::new(ThreadUnparker {
            thread: std::thread::current(),
            notified: AtomicBool::new(false),
        });
        let waker = Waker::from(Arc::clone(&unparker));
        let mut cx = Context::from_waker(&waker);

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

    /// Blocks until the runtime is quiescent, then stops its threads.
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        loop {
            let ready = self.scheduler.ready_count();
            let running = self.scheduler.running_count();
            let io_waiters = self.reactor.waiter_count();
            if ready == 0 && running == 0 && io_waiters == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        self.scheduler.begin_shutdown();
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        self.reactor.shutdown();
        self.timer.shutdown();
        tracing::debug!("runtime stopped");
    }

    /// Number of spawned, not-yet-completed tasks.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.scheduler.live_count()
    }

    pub(crate) fn timer(&self) -> &TimerDriver {
        &self.timer
    }

    pub(crate) fn reactor(&self) -> &Reactor {
        &self.reactor
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("live_tasks", &self.live_tasks())
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

struct ThreadUnparker {
    thread: std::thread::Thread,
    notified: AtomicBool,
}

impl Wake for ThreadUnparker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Spawns a task on the global runtime.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    Runtime::global().spawn(future)
}

/// Runs a future to completion on the calling thread, using the global
/// runtime for timers, I/O, and spawned tasks.
pub fn block_on<F: Future>(future: F) -> F::Output {
    Runtime::global().block_on(future)
}

pub(crate) fn timer_driver() -> &'static TimerDriver {
    Runtime::global().timer()
}

pub(crate) fn reactor() -> &'static Reactor {
    Runtime::global().reactor()
}

/// Hints that another ready task may run: re-queues the current task and
/// returns to the scheduler. With no other ready tasks this is an empty
/// round trip.
#[must_use = "futures do nothing unless awaited"]
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn spawn_runs_concurrently_and_join_returns_output() {
        init_test_logging();
        let handle = spawn(async { 21 * 2 });
        assert_eq!(block_on(handle), 42);
    }

    #[test]
    fn many_spawns_all_complete() {
        init_test_logging();
        let counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let counter = Arc::clone(&counter);
                spawn(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            block_on(handle);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn yield_now_round_trips() {
        init_test_logging();
        block_on(async {
            yield_now().await;
            yield_now().await;
        });
    }

    #[test]
    fn task_panic_is_contained() {
        init_test_logging();
        let before = Runtime::global().live_tasks();
        let _handle = spawn(async {
            panic!("boom");
        });
        // The panic is caught at the task boundary; the runtime keeps
        // scheduling other tasks.
        let ok = spawn(async { 1 });
        assert_eq!(block_on(ok), 1);
        // The panicked task is eventually accounted as completed.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while Runtime::global().live_tasks() > before && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
