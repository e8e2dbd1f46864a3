//! Wake locks.
//!
//! A [`WakeLock`] keeps the system out of suspend while it is held, either
//! indefinitely or until a tick deadline. The [`PowerManager`] tracks every
//! registered lock by name so suspend decisions (and tests) can inspect
//! which locks are currently active.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::sync::SpinLock;
use crate::time::SystemClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldState {
    Released,
    Held,
    /// Held until the given absolute tick.
    Until(u64),
}

struct LockEntry {
    name: String,
    state: SpinLock<HoldState>,
}

/// Registry of named wake locks.
pub struct PowerManager {
    clock: Arc<SystemClock>,
    locks: SpinLock<Vec<Arc<LockEntry>>>,
}

impl PowerManager {
    /// Creates a power manager whose timed locks expire against `clock`.
    pub fn new(clock: Arc<SystemClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            locks: SpinLock::new(Vec::new()),
        })
    }

    /// Registers a new, released wake lock called `name`.
    pub fn wake_lock(self: &Arc<Self>, name: &str) -> WakeLock {
        let entry = Arc::new(LockEntry {
            name: name.to_string(),
            state: SpinLock::new(HoldState::Released),
        });
        self.locks.lock().push(entry.clone());
        log::trace!("power: registered wake lock '{name}'");
        WakeLock {
            entry,
            pm: self.clone(),
        }
    }

    /// Names of every lock that is currently held.
    pub fn active_locks(&self) -> Vec<String> {
        let now = self.clock.ticks();
        self.locks
            .lock()
            .iter()
            .filter(|e| is_held(*e.state.lock(), now))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Returns `true` if any wake lock blocks suspend.
    pub fn suspend_blocked(&self) -> bool {
        let now = self.clock.ticks();
        self.locks.lock().iter().any(|e| is_held(*e.state.lock(), now))
    }

    /// Number of registered locks, held or not.
    pub fn registered(&self) -> usize {
        self.locks.lock().len()
    }
}

fn is_held(state: HoldState, now: u64) -> bool {
    match state {
        HoldState::Released => false,
        HoldState::Held => true,
        HoldState::Until(deadline) => now < deadline,
    }
}

/// Handle to one named wake lock. Dropping it unregisters the lock.
pub struct WakeLock {
    entry: Arc<LockEntry>,
    pm: Arc<PowerManager>,
}

impl WakeLock {
    /// Holds the lock until [`unlock`](Self::unlock).
    pub fn lock(&self) {
        *self.entry.state.lock() = HoldState::Held;
    }

    /// Holds the lock for `ticks` timer ticks from now, replacing any
    /// previous hold.
    pub fn lock_timeout(&self, ticks: u64) {
        let deadline = self.pm.clock.ticks().saturating_add(ticks);
        *self.entry.state.lock() = HoldState::Until(deadline);
    }

    /// Releases the lock.
    pub fn unlock(&self) {
        *self.entry.state.lock() = HoldState::Released;
    }

    /// Returns `true` while the lock blocks suspend.
    pub fn is_active(&self) -> bool {
        is_held(*self.entry.state.lock(), self.pm.clock.ticks())
    }

    /// The name the lock was registered under.
    pub fn name(&self) -> &str {
        &self.entry.name
    }
}

impl Drop for WakeLock {
    fn drop(&mut self) {
        self.pm
            .locks
            .lock()
            .retain(|e| !Arc::ptr_eq(e, &self.entry));
        log::trace!("power: destroyed wake lock '{}'", self.entry.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NSEC_PER_TICK;

    fn manager() -> (Arc<SystemClock>, Arc<PowerManager>) {
        let clock = Arc::new(SystemClock::new());
        let pm = PowerManager::new(clock.clone());
        (clock, pm)
    }

    #[test]
    fn lock_unlock() {
        let (_clock, pm) = manager();
        let wl = pm.wake_lock("alarm_1");
        assert!(!wl.is_active());
        wl.lock();
        assert!(wl.is_active());
        assert_eq!(pm.active_locks(), ["alarm_1"]);
        wl.unlock();
        assert!(!pm.suspend_blocked());
    }

    #[test]
    fn timed_lock_expires() {
        let (clock, pm) = manager();
        let wl = pm.wake_lock("alarm_rtc");
        wl.lock_timeout(5);
        clock.advance(NSEC_PER_TICK * 4);
        assert!(wl.is_active());
        clock.advance(NSEC_PER_TICK);
        assert!(!wl.is_active());
        assert!(pm.active_locks().is_empty());
    }

    #[test]
    fn drop_unregisters() {
        let (_clock, pm) = manager();
        let wl = pm.wake_lock("a");
        let _other = pm.wake_lock("b");
        wl.lock();
        assert_eq!(pm.registered(), 2);
        drop(wl);
        assert_eq!(pm.registered(), 1);
        assert!(pm.active_locks().is_empty());
    }
}
