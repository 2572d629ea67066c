//! The wait queue: the building block under every blocking primitive.
//!
//! A [`WaitQueue`] is a FIFO of parked waiters. Each [`WaitNode`] carries
//! a token and an atomic state word advanced by a single compare-exchange
//! from `WAITING` to exactly one of `NOTIFIED`, `TIMED_OUT`, or `CLOSED`.
//! The CAS is what disambiguates races: a late notify after a timeout is
//! a no-op (the CAS fails), as is a late timer fire after a notify.
//!
//! A node must sit in at most one queue at a time; whichever side wins
//! the CAS owns the wakeup. Dead nodes left in a queue by a timeout are
//! skipped and discarded by the next notifier.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Parked, waiting for an event.
pub(crate) const WAITING: u8 = 0;
/// Claimed by a notifier; the wakeup carries the primitive's payload.
pub(crate) const NOTIFIED: u8 = 1;
/// Cancelled by a timer (or by dropping the waiting future).
pub(crate) const TIMED_OUT: u8 = 2;
/// Cancelled because the owning primitive closed.
pub(crate) const CLOSED: u8 = 3;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// One parked waiter.
#[derive(Debug)]
pub(crate) struct WaitNode {
    token: u64,
    state: AtomicU8,
    waker: Mutex<Option<Waker>>,
}

impl WaitNode {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(WAITING),
            waker: Mutex::new(None),
        })
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    pub(crate) fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub(crate) fn is_waiting(&self) -> bool {
        self.state() == WAITING
    }

    /// Claims this node: CAS `WAITING -> to`. Exactly one claimer wins.
    pub(crate) fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(WAITING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Rearms a node the owner has already consumed. Only the owning
    /// future may call this, and only while the node is in no queue.
    pub(crate) fn rearm(&self) {
        self.state.store(WAITING, Ordering::Release);
    }

    pub(crate) fn set_waker(&self, waker: &Waker) {
        *self.waker.lock() = Some(waker.clone());
    }

    /// Wakes the parked task, if it has registered a waker.
    pub(crate) fn wake(&self) {
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }
}

/// A FIFO of parked waiters. Cheap to clone; clones share the queue.
#[derive(Debug, Clone, Default)]
pub(crate) struct WaitQueue {
    list: Arc<Mutex<VecDeque<Arc<WaitNode>>>>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Creates a node and parks it at the tail.
    pub(crate) fn enqueue(&self) -> Arc<WaitNode> {
        let node = WaitNode::new();
        self.list.lock().push_back(Arc::clone(&node));
        node
    }

    /// Claims and wakes the first live waiter. Returns false if none.
    pub(crate) fn notify_one(&self) -> bool {
        loop {
            let node = self.list.lock().pop_front();
            match node {
                Some(node) => {
                    if node.transition(NOTIFIED) {
                        node.wake();
                        return true;
                    }
                    // Dead node (timed out or cancelled): discard, try next.
                }
                None => return false,
            }
        }
    }

    /// Claims and wakes every live waiter. Returns how many were woken.
    pub(crate) fn notify_all(&self) -> usize {
        self.drain_with(NOTIFIED)
    }

    /// Marks every live waiter closed and wakes it.
    pub(crate) fn close_all(&self) -> usize {
        self.drain_with(CLOSED)
    }

    fn drain_with(&self, to: u8) -> usize {
        let drained: Vec<_> = {
            let mut list = self.list.lock();
            list.drain(..).collect()
        };
        let mut woken = 0;
        for node in drained {
            if node.transition(to) {
                node.wake();
                woken += 1;
            }
        }
        woken
    }

    /// Removes a node by token (after its state was claimed elsewhere).
    pub(crate) fn remove(&self, token: u64) -> bool {
        let mut list = self.list.lock();
        let before = list.len();
        list.retain(|node| node.token() != token);
        list.len() != before
    }

    /// Number of live waiters.
    pub(crate) fn len(&self) -> usize {
        self.list.lock().iter().filter(|n| n.is_waiting()).count()
    }
}

/// Awaits a node leaving the `WAITING` state; resolves to the final
/// state. Dropping the future while still waiting cancels the node
/// (`TIMED_OUT`) and removes it from the queue, so a notifier can never
/// claim an abandoned waiter.
pub(crate) struct AwaitNode {
    queue: WaitQueue,
    node: Arc<WaitNode>,
    done: bool,
}

impl AwaitNode {
    pub(crate) fn new(queue: WaitQueue, node: Arc<WaitNode>) -> Self {
        Self {
            queue,
            node,
            done: false,
        }
    }
}

impl Future for AwaitNode {
    type Output = u8;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u8> {
        let state = self.node.state();
        if state != WAITING {
            self.done = true;
            return Poll::Ready(state);
        }
        self.node.set_waker(cx.waker());
        // The claim may have landed between the check and the waker
        // registration; re-read so the wake is never lost.
        let state = self.node.state();
        if state != WAITING {
            self.done = true;
            return Poll::Ready(state);
        }
        Poll::Pending
    }
}

impl Drop for AwaitNode {
    fn drop(&mut self) {
        if !self.done && self.node.transition(TIMED_OUT) {
            self.queue.remove(self.node.token());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_one_is_fifo() {
        let queue = WaitQueue::new();
        let first = queue.enqueue();
        let second = queue.enqueue();

        assert!(queue.notify_one());
        assert_eq!(first.state(), NOTIFIED);
        assert_eq!(second.state(), WAITING);

        assert!(queue.notify_one());
        assert_eq!(second.state(), NOTIFIED);
        assert!(!queue.notify_one());
    }

    #[test]
    fn notify_skips_dead_nodes() {
        let queue = WaitQueue::new();
        let dead = queue.enqueue();
        let live = queue.enqueue();
        assert!(dead.transition(TIMED_OUT));

        assert!(queue.notify_one());
        assert_eq!(live.state(), NOTIFIED);
    }

    #[test]
    fn late_notify_after_timeout_is_noop() {
        let queue = WaitQueue::new();
        let node = queue.enqueue();

        // Timer wins the race.
        assert!(node.transition(TIMED_OUT));
        // The late notify claims nobody.
        assert!(!queue.notify_one());
        assert_eq!(node.state(), TIMED_OUT);
    }

    #[test]
    fn late_timeout_after_notify_is_noop() {
        let queue = WaitQueue::new();
        let node = queue.enqueue();

        assert!(queue.notify_one());
        // The late timer fire fails its CAS.
        assert!(!node.transition(TIMED_OUT));
        assert_eq!(node.state(), NOTIFIED);
    }

    #[test]
    fn notify_all_drains_live_waiters() {
        let queue = WaitQueue::new();
        let nodes: Vec<_> = (0..4).map(|_| queue.enqueue()).collect();
        nodes[1].transition(TIMED_OUT);

        assert_eq!(queue.notify_all(), 3);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn close_all_marks_closed() {
        let queue = WaitQueue::new();
        let node = queue.enqueue();
        assert_eq!(queue.close_all(), 1);
        assert_eq!(node.state(), CLOSED);
    }

    #[test]
    fn remove_by_token() {
        let queue = WaitQueue::new();
        let node = queue.enqueue();
        assert!(queue.remove(node.token()));
        assert!(!queue.remove(node.token()));
        assert!(!queue.notify_one());
    }

    #[test]
    fn await_node_resolves_on_claim() {
        let queue = WaitQueue::new();
        let node = queue.enqueue();
        let waiter = AwaitNode::new(queue.clone(), Arc::clone(&node));

        queue.notify_one();
        let state = crate::test_utils::block_on(waiter);
        assert_eq!(state, NOTIFIED);
    }

    #[test]
    fn dropping_await_node_cancels_the_waiter() {
        let queue = WaitQueue::new();
        let node = queue.enqueue();
        let waiter = AwaitNode::new(queue.clone(), Arc::clone(&node));
        drop(waiter);

        assert_eq!(node.state(), TIMED_OUT);
        assert!(!queue.notify_one());
    }
}
