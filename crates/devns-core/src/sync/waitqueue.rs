//! Heap-backed waker queue.

use alloc::collections::VecDeque;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use super::SpinLock;

/// Unbounded FIFO queue of parked wakers.
///
/// A waiter registers its waker and re-checks its wake condition before
/// returning `Pending`; a waker drains the queue under the lock and calls
/// [`Waker::wake`] after dropping it, so a woken task never spins on the
/// queue lock.
pub struct WaitQueue {
    waiters: SpinLock<VecDeque<Waker>>,
}

impl WaitQueue {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Returns a future that completes on the next wake after its first poll.
    pub fn wait(&self) -> WaitFuture<'_> {
        WaitFuture {
            queue: self,
            registered: false,
        }
    }

    /// Parks `waker` until the next [`wake_one`](Self::wake_one) or
    /// [`wake_all`](Self::wake_all).
    ///
    /// A waker that is already queued (same task) is not queued twice.
    pub fn register(&self, waker: &Waker) {
        let mut waiters = self.waiters.lock();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push_back(waker.clone());
        }
    }

    /// Wakes the longest-waiting task.
    pub fn wake_one(&self) {
        let waker = self.waiters.lock().pop_front();
        if let Some(w) = waker {
            w.wake();
        }
    }

    /// Wakes every parked task.
    pub fn wake_all(&self) {
        let drained = core::mem::take(&mut *self.waiters.lock());
        for w in drained {
            w.wake();
        }
    }

    /// Number of parked wakers.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Returns `true` if no task is parked.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`WaitQueue::wait`].
pub struct WaitFuture<'a> {
    queue: &'a WaitQueue,
    registered: bool,
}

impl Future for WaitFuture<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.registered {
            Poll::Ready(())
        } else {
            self.registered = true;
            self.queue.register(cx.waker());
            Poll::Pending
        }
    }
}
