//! Synchronization primitives for namespace payloads.
//!
//! Per-namespace state is guarded by a [`SpinLock`]: every critical section
//! in the drivers is short and never sleeps. Blocking waits go through a
//! [`WaitQueue`], which is woken after the lock has been dropped.

mod waitqueue;

#[cfg(any(test, feature = "test-util"))]
pub mod test_waker;

pub use waitqueue::{WaitFuture, WaitQueue};

/// Spinlock-class mutual exclusion for short critical sections.
pub type SpinLock<T> = spin::Mutex<T>;

/// Guard returned by [`SpinLock::lock`].
pub type SpinLockGuard<'a, T> = spin::MutexGuard<'a, T>;
