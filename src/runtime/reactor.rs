//! I/O reactor: readiness events in, task wakeups out.
//!
//! A single reactor thread owns the OS poller and the fd table. Each
//! registered fd holds at most one waiter per direction (read/write);
//! arming a direction that already has a live waiter is a programming
//! error and is rejected. Interest is armed per wait and dropped on
//! delivery, so every wakeup is followed by a syscall re-attempt: a
//! spurious wake or a lost edge costs one extra attempt and nothing
//! else.
//!
//! Closing an fd wakes both direction waiters with a closed outcome,
//! deregisters the fd, and leaves the syscall-level close to the socket
//! owner.

use crate::sync::wait_queue::{WaitNode, CLOSED, NOTIFIED};
use parking_lot::Mutex;
use polling::{Event, Poller};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Which readiness direction an operation waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

#[derive(Default)]
struct FdEntry {
    read: Option<Arc<WaitNode>>,
    write: Option<Arc<WaitNode>>,
}

impl FdEntry {
    fn slot_mut(&mut self, direction: Direction) -> &mut Option<Arc<WaitNode>> {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }

    fn interest(&self, key: usize) -> Event {
        Event {
            key,
            readable: self.read.as_ref().is_some_and(|n| n.is_waiting()),
            writable: self.write.as_ref().is_some_and(|n| n.is_waiting()),
        }
    }
}

/// The process-wide reactor.
pub(crate) struct Reactor {
    poller: Arc<Poller>,
    entries: Arc<Mutex<HashMap<RawFd, FdEntry>>>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Reactor {
    /// Starts the reactor and its poll thread.
    pub(crate) fn start(event_backlog: usize) -> io::Result<Self> {
        let poller = Arc::new(Poller::new()?);
        let entries: Arc<Mutex<HashMap<RawFd, FdEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let poller = Arc::clone(&poller);
            let entries = Arc::clone(&entries);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("fibril-reactor".to_string())
                .spawn(move || poll_loop(&poller, &entries, &shutdown, event_backlog))?
        };

        Ok(Self {
            poller,
            entries,
            shutdown,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Adds an fd to the table with no interest armed.
    pub(crate) fn register(&self, fd: RawFd) -> io::Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&fd) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "fd already registered with the reactor",
            ));
        }
        // SAFETY: the fd is owned by the socket wrapper performing this
        // registration and stays open for its whole lifetime; the wrapper
        // deregisters through `close_fd` before the fd is closed, so the
        // poller never holds a dangling source.
        unsafe {
            self.poller.add(fd, Event::none(fd as usize))?;
        }
        entries.insert(fd, FdEntry::default());
        Ok(())
    }

    /// Parks `node` as the fd's waiter for `direction` and arms interest.
    ///
    /// At most one waiter may exist per direction; a second one is a
    /// programming error and is rejected.
    pub(crate) fn arm(
        &self,
        fd: RawFd,
        direction: Direction,
        node: &Arc<WaitNode>,
    ) -> io::Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&fd).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "fd not registered with the reactor")
        })?;

        let slot = entry.slot_mut(direction);
        if slot.as_ref().is_some_and(|n| n.is_waiting()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "fd direction already has a waiter",
            ));
        }
        *slot = Some(Arc::clone(node));

        let interest = entry.interest(fd as usize);
        self.poller.modify(fd, interest)?;
        Ok(())
    }

    /// Clears a waiter whose state was claimed elsewhere (timeout or
    /// dropped future) and disarms the direction.
    pub(crate) fn cancel_waiter(&self, fd: RawFd, direction: Direction, token: u64) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&fd) else {
            return;
        };
        let slot = entry.slot_mut(direction);
        if slot.as_ref().is_some_and(|n| n.token() == token) {
            *slot = None;
            let interest = entry.interest(fd as usize);
            let _ = self.poller.modify(fd, interest);
        }
    }

    /// Wakes both direction waiters with a closed outcome and removes
    /// the fd from the table.
    pub(crate) fn close_fd(&self, fd: RawFd) {
        let entry = self.entries.lock().remove(&fd);
        let Some(entry) = entry else {
            return;
        };
        let _ = self.poller.delete(fd);
        for node in [entry.read, entry.write].into_iter().flatten() {
            if node.transition(CLOSED) {
                node.wake();
            }
        }
    }

    /// Number of live waiters across the fd table.
    pub(crate) fn waiter_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .map(|entry| {
                usize::from(entry.read.as_ref().is_some_and(|n| n.is_waiting()))
                    + usize::from(entry.write.as_ref().is_some_and(|n| n.is_waiting()))
            })
            .sum()
    }

    /// Number of registered fds.
    pub(crate) fn registration_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Stops the poll thread.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.poller.notify();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("registrations", &self.registration_count())
            .field("waiters", &self.waiter_count())
            .finish_non_exhaustive()
    }
}

fn poll_loop(
    poller: &Arc<Poller>,
    entries: &Arc<Mutex<HashMap<RawFd, FdEntry>>>,
    shutdown: &Arc<AtomicBool>,
    event_backlog: usize,
) {
    let mut events: Vec<Event> = Vec::with_capacity(event_backlog.max(1));

    while !shutdown.load(Ordering::SeqCst) {
        events.clear();
        match poller.wait(&mut events, Some(Duration::from_millis(100))) {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(error = %e, "reactor poll failed");
                continue;
            }
        }

        for event in &events {
            let fd = event.key as RawFd;
            let mut to_wake = Vec::new();
            {
                let mut table = entries.lock();
                let Some(entry) = table.get_mut(&fd) else {
                    continue;
                };
                if event.readable {
                    if let Some(node) = entry.read.take() {
                        to_wake.push(node);
                    }
                }
                if event.writable {
                    if let Some(node) = entry.write.take() {
                        to_wake.push(node);
                    }
                }
                // Re-arm whatever direction still has a live waiter; the
                // delivered direction stays disarmed until re-armed by a
                // retry that hits WouldBlock again.
                let interest = entry.interest(event.key);
                if interest.readable || interest.writable {
                    let _ = poller.modify(fd, interest);
                }
            }
            for node in to_wake {
                if node.transition(NOTIFIED) {
                    node.wake();
                }
            }
        }
    }
}
