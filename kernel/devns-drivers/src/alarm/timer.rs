//! Host timer base for alarm timers.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use devns_core::sync::SpinLock;
use devns_core::time::{SystemClock, Timespec};

use super::AlarmType;
use super::state::AlarmState;

/// One alarm type's timer in one namespace.
///
/// The timer does not own its namespace's state: it holds a weak
/// back-reference so the fire path reaches the right namespace without any
/// notion of a "current" caller.
pub struct AlarmTimer {
    kind: AlarmType,
    owner: Weak<AlarmState>,
    /// Bumped on every arm and cancel; a fire carrying a stale value is
    /// ignored.
    seq: AtomicU64,
    expires: SpinLock<Option<Timespec>>,
}

impl AlarmTimer {
    pub(super) fn new(kind: AlarmType, owner: Weak<AlarmState>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            owner,
            seq: AtomicU64::new(0),
            expires: SpinLock::new(None),
        })
    }

    /// Alarm type this timer serves.
    pub fn kind(&self) -> AlarmType {
        self.kind
    }

    /// Absolute expiry, if armed.
    pub fn expires(&self) -> Option<Timespec> {
        *self.expires.lock()
    }

    pub(super) fn seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }
}

/// Every armed alarm timer, across all namespaces.
///
/// [`run_expired`](Self::run_expired) is the timer interrupt: it pulls the
/// due timers off the queue and fires each one with no queue lock held.
pub struct AlarmTimerQueue {
    clock: Arc<SystemClock>,
    armed: SpinLock<Vec<Arc<AlarmTimer>>>,
}

impl AlarmTimerQueue {
    /// Creates an empty queue that compares deadlines against `clock`.
    pub fn new(clock: Arc<SystemClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            armed: SpinLock::new(Vec::new()),
        })
    }

    /// Arms `timer` for the absolute time `at`, replacing any earlier expiry.
    pub fn arm(&self, timer: &Arc<AlarmTimer>, at: Timespec) {
        let mut armed = self.armed.lock();
        timer.seq.fetch_add(1, Ordering::AcqRel);
        *timer.expires.lock() = Some(at);
        if !armed.iter().any(|t| Arc::ptr_eq(t, timer)) {
            armed.push(timer.clone());
        }
    }

    /// Disarms `timer`. Returns `true` if it was armed.
    pub fn cancel(&self, timer: &Arc<AlarmTimer>) -> bool {
        let mut armed = self.armed.lock();
        timer.seq.fetch_add(1, Ordering::AcqRel);
        *timer.expires.lock() = None;
        let before = armed.len();
        armed.retain(|t| !Arc::ptr_eq(t, timer));
        armed.len() != before
    }

    /// Number of armed timers.
    pub fn armed(&self) -> usize {
        self.armed.lock().len()
    }

    /// Earliest deadline among armed timers on `kind`'s clock.
    pub fn next_expiry(&self, kind: AlarmType) -> Option<Timespec> {
        self.armed
            .lock()
            .iter()
            .filter(|t| t.kind.clock_base() == kind.clock_base())
            .filter_map(|t| t.expires())
            .min()
    }

    /// Fires every timer whose deadline has passed. Returns how many fired.
    pub fn run_expired(&self) -> usize {
        let realtime = self.clock.realtime();
        let boottime = self.clock.boottime();
        let due: Vec<(Arc<AlarmTimer>, u64)> = {
            let mut armed = self.armed.lock();
            let mut due = Vec::new();
            armed.retain(|t| {
                let now = match t.kind.clock_base() {
                    ClockBase::Realtime => realtime,
                    ClockBase::Boottime => boottime,
                };
                match t.expires() {
                    Some(at) if at <= now => {
                        due.push((t.clone(), t.seq()));
                        false
                    }
                    _ => true,
                }
            });
            due
        };
        let fired = due.len();
        for (timer, seq) in due {
            if let Some(owner) = timer.owner.upgrade() {
                owner.fire(&timer, seq);
            }
        }
        fired
    }
}

/// Clock an alarm type's deadlines are measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockBase {
    /// Wall-clock time (`CLOCK_REALTIME`).
    Realtime,
    /// Time since boot including suspend (`CLOCK_BOOTTIME`).
    Boottime,
}
