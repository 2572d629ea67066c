//! Runtime configuration.
//!
//! [`RuntimeConfig`] holds the concrete values that drive runtime behavior.
//! Use [`RuntimeBuilder`] to construct a runtime rather than filling the
//! struct by hand.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `worker_stack_bytes` | 128 KiB |
//! | `timer_tick` | 1 ms |
//! | `reactor_event_backlog` | 256 |
//! | `thread_name_prefix` | `"fibril-worker"` |
//!
//! Every field can also be overridden from the environment:
//! `FIBRIL_WORKER_THREADS`, `FIBRIL_STACK_BYTES`, `FIBRIL_TIMER_TICK_MS`,
//! `FIBRIL_REACTOR_BACKLOG`. Unparsable values are ignored.

use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads (default: available parallelism).
    pub worker_threads: usize,
    /// Stack size per worker thread.
    pub worker_stack_bytes: usize,
    /// Timer wheel tick granularity.
    pub timer_tick: Duration,
    /// Event batch capacity for one reactor poll.
    pub reactor_event_backlog: usize,
    /// Name prefix for worker threads.
    pub thread_name_prefix: String,
}

impl RuntimeConfig {
    /// Normalizes configuration values to safe bounds.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.worker_stack_bytes < 16 * 1024 {
            self.worker_stack_bytes = 16 * 1024;
        }
        if self.timer_tick.is_zero() {
            self.timer_tick = Duration::from_millis(1);
        }
        if self.reactor_event_backlog == 0 {
            self.reactor_event_backlog = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = "fibril-worker".to_string();
        }
    }

    /// Applies `FIBRIL_*` environment overrides on top of this config.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(n) = parse_env::<usize>("FIBRIL_WORKER_THREADS") {
            self.worker_threads = n;
        }
        if let Some(n) = parse_env::<usize>("FIBRIL_STACK_BYTES") {
            self.worker_stack_bytes = n;
        }
        if let Some(ms) = parse_env::<u64>("FIBRIL_TIMER_TICK_MS") {
            self.timer_tick = Duration::from_millis(ms);
        }
        if let Some(n) = parse_env::<usize>("FIBRIL_REACTOR_BACKLOG") {
            self.reactor_event_backlog = n;
        }
        self
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            worker_stack_bytes: 128 * 1024,
            timer_tick: Duration::from_millis(1),
            reactor_event_backlog: 256,
            thread_name_prefix: "fibril-worker".to_string(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// Builder for constructing a runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-worker preset, useful for deterministic tests.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::new().worker_threads(1)
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Sets the per-worker stack size in bytes.
    #[must_use]
    pub fn worker_stack_bytes(mut self, bytes: usize) -> Self {
        self.config.worker_stack_bytes = bytes;
        self
    }

    /// Sets the timer tick granularity.
    #[must_use]
    pub fn timer_tick(mut self, tick: Duration) -> Self {
        self.config.timer_tick = tick;
        self
    }

    /// Sets the reactor event batch capacity.
    #[must_use]
    pub fn reactor_event_backlog(mut self, backlog: usize) -> Self {
        self.config.reactor_event_backlog = backlog;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Finishes the builder, returning a normalized configuration.
    #[must_use]
    pub fn build(mut self) -> RuntimeConfig {
        self.config.normalize();
        self.config
    }
}
