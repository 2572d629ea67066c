//! Bounded channels with rendezvous support.
//!
//! A [`Channel`] is a typed FIFO of capacity `C >= 0` shared by any
//! number of tasks (handles are cheap clones). Capacity 0 is a
//! rendezvous: a send pairs directly with a receive and neither side
//! buffers.
//!
//! # Close semantics
//!
//! `close` is effect-idempotent; the first call returns true. After
//! close no send succeeds, parked senders fail with the value handed
//! back, parked receivers fail, and buffered items remain drainable
//! until the buffer is empty.
//!
//! # Ordering
//!
//! Items are delivered in send order. Parked senders are released FIFO
//! into freed buffer slots, so ordering holds across backpressure.

use crate::sync::wait_queue::{WaitNode, CLOSED, NOTIFIED, TIMED_OUT, WAITING};
use crate::time::TimerAction;
use crate::time::TimerHandle;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Error returned by [`Channel::send`] on a closed channel; carries the
/// unsent value.
#[derive(Debug, PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> std::fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("sending on a closed channel")
    }
}

impl<T: std::fmt::Debug> std::error::Error for SendError<T> {}

/// Error returned by [`Channel::try_send`].
#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The channel is full (or capacity 0 with no waiting receiver).
    Full(T),
    /// The channel is closed.
    Closed(T),
}

impl<T> std::fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full(_) => f.write_str("channel is full"),
            Self::Closed(_) => f.write_str("sending on a closed channel"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for TrySendError<T> {}

/// Error returned by [`Channel::send_timeout`]; both variants hand the
/// value back; a timed-out send never buffers it.
#[derive(Debug, PartialEq, Eq)]
pub enum SendTimeoutError<T> {
    /// The deadline elapsed before space (or a receiver) appeared.
    Timeout(T),
    /// The channel is closed.
    Closed(T),
}

impl<T> std::fmt::Display for SendTimeoutError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(_) => f.write_str("send timed out"),
            Self::Closed(_) => f.write_str("sending on a closed channel"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for SendTimeoutError<T> {}

/// Error returned by [`Channel::recv`] once the channel is closed and
/// drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("receiving on a closed channel")]
pub struct RecvError;

/// Error returned by [`Channel::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// No value is ready.
    #[error("channel is empty")]
    Empty,
    /// Closed and drained.
    #[error("receiving on a closed channel")]
    Closed,
}

/// Error returned by [`Channel::recv_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvTimeoutError {
    /// The deadline elapsed before a value arrived.
    #[error("receive timed out")]
    Timeout,
    /// Closed and drained.
    #[error("receiving on a closed channel")]
    Closed,
}

struct SendWaiter<T> {
    node: Arc<WaitNode>,
    value: Mutex<Option<T>>,
}

struct RecvWaiter<T> {
    node: Arc<WaitNode>,
    slot: Mutex<Option<T>>,
}

struct Inner<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    closed: bool,
    send_waiters: VecDeque<Arc<SendWaiter<T>>>,
    recv_waiters: VecDeque<Arc<RecvWaiter<T>>>,
}

impl<T> Inner<T> {
    /// Core send attempt: handoff to a parked receiver, else buffer.
    /// A live receiver implies an empty buffer, so handoff keeps order.
    fn try_send(&mut self, value: T, wake: &mut Vec<Arc<WaitNode>>) -> Result<(), TrySendError<T>> {
        if self.closed {
            return Err(TrySendError::Closed(value));
        }

        while let Some(receiver) = self.recv_waiters.pop_front() {
            if receiver.node.transition(NOTIFIED) {
                *receiver.slot.lock() = Some(value);
                wake.push(Arc::clone(&receiver.node));
                return Ok(());
            }
            // Dead waiter (timed out): discard and try the next.
        }

        if self.buffer.len() < self.capacity {
            self.buffer.push_back(value);
            return Ok(());
        }
        Err(TrySendError::Full(value))
    }

    /// Core receive attempt: buffer head first, then a parked sender
    /// (rendezvous). A freed slot is refilled from the first parked
    /// sender to preserve send order under backpressure.
    fn try_recv(&mut self, wake: &mut Vec<Arc<WaitNode>>) -> Result<T, TryRecvError> {
        if let Some(value) = self.buffer.pop_front() {
            self.refill_from_sender(wake);
            return Ok(value);
        }

        while let Some(sender) = self.send_waiters.pop_front() {
            if sender.node.transition(NOTIFIED) {
                let value = sender.value.lock().take().expect("claimed sender kept its value");
                wake.push(Arc::clone(&sender.node));
                return Ok(value);
            }
        }

        if self.closed {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    fn refill_from_sender(&mut self, wake: &mut Vec<Arc<WaitNode>>) {
        while let Some(sender) = self.send_waiters.pop_front() {
            if sender.node.transition(NOTIFIED) {
                let value = sender.value.lock().take().expect("claimed sender kept its value");
                self.buffer.push_back(value);
                wake.push(Arc::clone(&sender.node));
                return;
            }
        }
    }
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
}

/// A bounded channel handle. Clones share the same channel.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("Channel")
            .field("len", &inner.buffer.len())
            .field("capacity", &inner.capacity)
            .field("closed", &inner.closed)
            .finish_non_exhaustive()
    }
}

/// Creates a bounded channel of the given capacity (0 = rendezvous).
#[must_use]
pub fn bounded<T>(capacity: usize) -> Channel<T> {
    Channel {
        shared: Arc::new(Shared {
            inner: Mutex::new(Inner {
                buffer: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
                send_waiters: VecDeque::new(),
                recv_waiters: VecDeque::new(),
            }),
        }),
    }
}

impl<T> Channel<T> {
    /// Creates a channel with the given capacity (0 = rendezvous).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        bounded(capacity)
    }

    /// Sends a value, parking while the channel is full (or, at capacity
    /// 0, until a receiver arrives). Fails only when closed, handing the
    /// value back.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>>
    where
        T: Send + 'static,
    {
        let send = SendFuture {
            channel: self,
            value: Some(value),
            waiter: None,
            timeout: None,
            timer: None,
        };
        match send.await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(value) | SendTimeoutError::Timeout(value)) => {
                Err(SendError(value))
            }
        }
    }

    /// Like [`send`](Self::send) with a deadline. On timeout the value
    /// comes back in the error; it is never buffered.
    pub fn send_timeout(&self, value: T, timeout: Duration) -> SendFuture<'_, T> {
        SendFuture {
            channel: self,
            value: Some(value),
            waiter: None,
            timeout: Some(timeout),
            timer: None,
        }
    }

    /// Receives the next value, parking while the channel is empty.
    /// Fails once the channel is closed and drained.
    pub async fn recv(&self) -> Result<T, RecvError>
    where
        T: Send + 'static,
    {
        let recv = RecvFuture {
            channel: self,
            waiter: None,
            timeout: None,
            timer: None,
        };
        recv.await.map_err(|_| RecvError)
    }

    /// Like [`recv`](Self::recv) with a deadline.
    pub fn recv_timeout(&self, timeout: Duration) -> RecvFuture<'_, T> {
        RecvFuture {
            channel: self,
            waiter: None,
            timeout: Some(timeout),
            timer: None,
        }
    }

    /// Non-parking send.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut wake = Vec::new();
        let result = self.shared.inner.lock().try_send(value, &mut wake);
        for node in wake {
            node.wake();
        }
        result
    }

    /// Non-parking receive.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut wake = Vec::new();
        let result = self.shared.inner.lock().try_recv(&mut wake);
        for node in wake {
            node.wake();
        }
        result
    }

    /// Closes the channel. The first call returns true; repeat calls
    /// leave state unchanged and return false.
    pub fn close(&self) -> bool {
        let (first, waiters) = {
            let mut inner = self.shared.inner.lock();
            if inner.closed {
                (false, Vec::new())
            } else {
                inner.closed = true;
                let mut nodes: Vec<Arc<WaitNode>> = Vec::new();
                nodes.extend(inner.send_waiters.drain(..).map(|w| Arc::clone(&w.node)));
                nodes.extend(inner.recv_waiters.drain(..).map(|w| Arc::clone(&w.node)));
                (true, nodes)
            }
        };
        for node in waiters {
            if node.transition(CLOSED) {
                node.wake();
            }
        }
        first
    }

    /// Returns true if the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    /// Number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.inner.lock().buffer.len()
    }

    /// Returns true if no values are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.inner.lock().buffer.is_empty()
    }

    /// The channel capacity (0 = rendezvous).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.inner.lock().capacity
    }
}

/// Future returned by [`Channel::send`] and [`Channel::send_timeout`].
#[must_use = "futures do nothing unless awaited"]
pub struct SendFuture<'a, T> {
    channel: &'a Channel<T>,
    value: Option<T>,
    waiter: Option<Arc<SendWaiter<T>>>,
    timeout: Option<Duration>,
    timer: Option<TimerHandle>,
}

// The held value is never borrowed across polls; the future has no
// structural pinning.
impl<T> Unpin for SendFuture<'_, T> {}

impl<T: Send + 'static> Future for SendFuture<'_, T> {
    type Output = Result<(), SendTimeoutError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(waiter) = &self.waiter {
            let state = waiter.node.state();
            if state == WAITING {
                waiter.node.set_waker(cx.waker());
                if waiter.node.state() == WAITING {
                    return Poll::Pending;
                }
            }
            let state = waiter.node.state();
            let waiter = self.waiter.take().expect("checked above");
            self.cancel_timer();
            return Poll::Ready(match state {
                NOTIFIED => Ok(()),
                TIMED_OUT => {
                    let value = waiter.value.lock().take().expect("unclaimed value");
                    Err(SendTimeoutError::Timeout(value))
                }
                _ => {
                    let value = waiter.value.lock().take().expect("unclaimed value");
                    Err(SendTimeoutError::Closed(value))
                }
            });
        }

        let value = self.value.take().expect("polled after completion");
        let mut wake = Vec::new();
        let parked = {
            let mut inner = self.channel.shared.inner.lock();
            match inner.try_send(value, &mut wake) {
                Ok(()) => None,
                Err(TrySendError::Closed(value)) => Some(Err(value)),
                Err(TrySendError::Full(value)) => {
                    let waiter = Arc::new(SendWaiter {
                        node: WaitNode::new(),
                        value: Mutex::new(Some(value)),
                    });
                    waiter.node.set_waker(cx.waker());
                    inner.send_waiters.push_back(Arc::clone(&waiter));
                    Some(Ok(waiter))
                }
            }
        };
        for node in wake {
            node.wake();
        }

        match parked {
            None => Poll::Ready(Ok(())),
            Some(Err(value)) => Poll::Ready(Err(SendTimeoutError::Closed(value))),
            Some(Ok(waiter)) => {
                if let Some(duration) = self.timeout {
                    self.timer = Some(schedule_send_timeout(
                        &self.channel.shared,
                        &waiter,
                        duration,
                    ));
                }
                self.waiter = Some(waiter);
                Poll::Pending
            }
        }
    }
}

impl<T> SendFuture<'_, T> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            crate::runtime::timer_driver().cancel(&timer);
        }
    }
}

impl<T> Drop for SendFuture<'_, T> {
    fn drop(&mut self) {
        self.cancel_timer();
        if let Some(waiter) = self.waiter.take() {
            if waiter.node.transition(TIMED_OUT) {
                let token = waiter.node.token();
                let mut inner = self.channel.shared.inner.lock();
                inner.send_waiters.retain(|w| w.node.token() != token);
            }
        }
    }
}

fn schedule_send_timeout<T: Send + 'static>(
    shared: &Arc<Shared<T>>,
    waiter: &Arc<SendWaiter<T>>,
    duration: Duration,
) -> TimerHandle {
    let shared = Arc::clone(shared);
    let waiter = Arc::clone(waiter);
    crate::runtime::timer_driver().schedule(
        duration,
        TimerAction::Callback(Arc::new(move || {
            if waiter.node.transition(TIMED_OUT) {
                let token = waiter.node.token();
                shared.inner.lock().send_waiters.retain(|w| w.node.token() != token);
                waiter.node.wake();
            }
        })),
        false,
    )
}

/// Future returned by [`Channel::recv`] and [`Channel::recv_timeout`].
#[must_use = "futures do nothing unless awaited"]
pub struct RecvFuture<'a, T> {
    channel: &'a Channel<T>,
    waiter: Option<Arc<RecvWaiter<T>>>,
    timeout: Option<Duration>,
    timer: Option<TimerHandle>,
}

impl<T> Unpin for RecvFuture<'_, T> {}

impl<T: Send + 'static> Future for RecvFuture<'_, T> {
    type Output = Result<T, RecvTimeoutError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(waiter) = &self.waiter {
            let state = waiter.node.state();
            if state == WAITING {
                waiter.node.set_waker(cx.waker());
                if waiter.node.state() == WAITING {
                    return Poll::Pending;
                }
            }
            let state = waiter.node.state();
            let waiter = self.waiter.take().expect("checked above");
            self.cancel_timer();
            return Poll::Ready(match state {
                NOTIFIED => {
                    let value = waiter.slot.lock().take().expect("notified without a value");
                    Ok(value)
                }
                TIMED_OUT => Err(RecvTimeoutError::Timeout),
                _ => Err(RecvTimeoutError::Closed),
            });
        }

        let mut wake = Vec::new();
        let outcome = {
            let mut inner = self.channel.shared.inner.lock();
            match inner.try_recv(&mut wake) {
                Ok(value) => Err(Ok(value)),
                Err(TryRecvError::Closed) => Err(Err(RecvTimeoutError::Closed)),
                Err(TryRecvError::Empty) => {
                    let waiter = Arc::new(RecvWaiter {
                        node: WaitNode::new(),
                        slot: Mutex::new(None),
                    });
                    waiter.node.set_waker(cx.waker());
                    inner.recv_waiters.push_back(Arc::clone(&waiter));
                    Ok(waiter)
                }
            }
        };
        for node in wake {
            node.wake();
        }

        match outcome {
            Err(result) => Poll::Ready(result),
            Ok(waiter) => {
                if let Some(duration) = self.timeout {
                    self.timer = Some(schedule_recv_timeout(
                        &self.channel.shared,
                        &waiter,
                        duration,
                    ));
                }
                self.waiter = Some(waiter);
                Poll::Pending
            }
        }
    }
}

impl<T> RecvFuture<'_, T> {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            crate::runtime::timer_driver().cancel(&timer);
        }
    }
}

impl<T> Drop for RecvFuture<'_, T> {
    fn drop(&mut self) {
        self.cancel_timer();
        if let Some(waiter) = self.waiter.take() {
            if waiter.node.transition(TIMED_OUT) {
                let token = waiter.node.token();
                let mut inner = self.channel.shared.inner.lock();
                inner.recv_waiters.retain(|w| w.node.token() != token);
            }
        }
    }
}

fn schedule_recv_timeout<T: Send + 'static>(
    shared: &Arc<Shared<T>>,
    waiter: &Arc<RecvWaiter<T>>,
    duration: Duration,
) -> TimerHandle {
    let shared = Arc::clone(shared);
    let waiter = Arc::clone(waiter);
    crate::runtime::timer_driver().schedule(
        duration,
        TimerAction::Callback(Arc::new(move || {
            if waiter.node.transition(TIMED_OUT) {
                let token = waiter.node.token();
                shared.inner.lock().recv_waiters.retain(|w| w.node.token() != token);
                waiter.node.wake();
            }
        })),
        false,
    )
}
