//! Non-blocking networking adapted into suspension points.
//!
//! Sockets run in non-blocking mode; an operation that would block
//! parks the calling task as the fd's waiter for that direction and the
//! reactor wakes it on readiness. Every operation takes an optional
//! timeout backed by the timer wheel.
//!
//! Return values distinguish success (byte count or new connection),
//! peer-closed (`Ok(0)` from `read`), timeout (`ErrorKind::TimedOut`,
//! errno `ETIMEDOUT`), and error. Closing a socket cancels both
//! direction waiters with an `EBADF` error.

mod tcp;

pub use tcp::{TcpListener, TcpStream};

use crate::runtime::reactor::Direction;
use crate::sync::wait_queue::{WaitNode, NOTIFIED, TIMED_OUT, WAITING};
use crate::time::TimerAction;
use std::future::Future;
use std::io;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

pub(crate) fn timeout_error() -> io::Error {
    io::Error::from_raw_os_error(libc::ETIMEDOUT)
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::from_raw_os_error(libc::EBADF)
}

/// Runs one non-blocking operation to completion against an fd: attempt
/// the syscall, park on `WouldBlock`, retry after every wake. The
/// deadline covers the whole operation, not a single wait.
pub(crate) async fn io_op<R>(
    fd: RawFd,
    direction: Direction,
    timeout: Option<Duration>,
    mut op: impl FnMut() -> io::Result<R>,
) -> io::Result<R> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let node = WaitNode::new();
    let mut timer = None;

    let result = loop {
        match op() {
            Ok(value) => break Ok(value),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        break Err(timeout_error());
                    }
                    if timer.is_none() {
                        timer = Some(schedule_io_timeout(fd, direction, &node, deadline));
                    }
                }

                node.rearm();
                let state = Readiness {
                    fd,
                    direction,
                    node: Arc::clone(&node),
                    armed: false,
                    done: false,
                }
                .await?;

                match state {
                    NOTIFIED => {}
                    TIMED_OUT => break Err(timeout_error()),
                    _ => break Err(closed_error()),
                }
            }
            Err(e) => break Err(e),
        }
    };

    if let Some(timer) = timer {
        crate::runtime::timer_driver().cancel(&timer);
    }
    result
}

fn schedule_io_timeout(
    fd: RawFd,
    direction: Direction,
    node: &Arc<WaitNode>,
    deadline: Instant,
) -> crate::time::TimerHandle {
    let node = Arc::clone(node);
    let delay = deadline.saturating_duration_since(Instant::now());
    crate::runtime::timer_driver().schedule(
        delay,
        TimerAction::Callback(Arc::new(move || {
            if node.transition(TIMED_OUT) {
                crate::runtime::reactor().cancel_waiter(fd, direction, node.token());
                node.wake();
            }
        })),
        false,
    )
}

/// One parked wait for fd readiness. Arms on first poll; resolves to the
/// node's final state. Dropping it mid-wait cancels the fd waiter so the
/// direction frees up.
struct Readiness {
    fd: RawFd,
    direction: Direction,
    node: Arc<WaitNode>,
    armed: bool,
    done: bool,
}

impl Future for Readiness {
    type Output = io::Result<u8>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.armed {
            // Waker first: the event may fire the instant interest is
            // armed.
            self.node.set_waker(cx.waker());
            crate::runtime::reactor().arm(self.fd, self.direction, &self.node)?;
            self.armed = true;
            // The timeout may have claimed the node before the arm; the
            // slot then holds a dead waiter nobody will wake.
            let state = self.node.state();
            if state != WAITING {
                self.done = true;
                crate::runtime::reactor().cancel_waiter(self.fd, self.direction, self.node.token());
                return Poll::Ready(Ok(state));
            }
            return Poll::Pending;
        }

        let state = self.node.state();
        if state != WAITING {
            self.done = true;
            return Poll::Ready(Ok(state));
        }
        self.node.set_waker(cx.waker());
        let state = self.node.state();
        if state != WAITING {
            self.done = true;
            return Poll::Ready(Ok(state));
        }
        Poll::Pending
    }
}

impl Drop for Readiness {
    fn drop(&mut self) {
        if self.armed && !self.done && self.node.transition(TIMED_OUT) {
            crate::runtime::reactor().cancel_waiter(self.fd, self.direction, self.node.token());
        }
    }
}
