//! The calling task as seen by a driver entry point.
//!
//! Drivers never look up an ambient "current" process: every entry point
//! receives the caller's [`Task`], which carries its identities (both the
//! global ones and the ones seen inside its namespace), credentials, owning
//! device namespace, and pending-signal state.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use core::task::Waker;

use bitflags::bitflags;

use crate::id::{Gid, Pid, Uid};
use crate::ns::DevNamespace;
use crate::sync::SpinLock;

bitflags! {
    /// Capabilities relevant to the namespaced drivers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// Read every log record regardless of uid (`CAP_SYSLOG`).
        const SYSLOG = 1 << 0;
        /// Set the system clock (`CAP_SYS_TIME`).
        const SYS_TIME = 1 << 1;
        /// General administration (`CAP_SYS_ADMIN`).
        const SYS_ADMIN = 1 << 2;
    }
}

/// User and group identity of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Real user id.
    pub uid: Uid,
    /// Effective user id.
    pub euid: Uid,
    /// Effective group id.
    pub egid: Gid,
    /// Supplementary groups.
    pub groups: Vec<Gid>,
    /// Effective capability set.
    pub caps: Capabilities,
}

impl Credentials {
    /// Superuser credentials with every capability.
    pub fn root() -> Self {
        Self {
            uid: Uid::ROOT,
            euid: Uid::ROOT,
            egid: Gid::new(0),
            groups: Vec::new(),
            caps: Capabilities::all(),
        }
    }

    /// Unprivileged credentials for `uid`, with a matching primary group.
    pub fn user(uid: u32) -> Self {
        Self {
            uid: Uid::new(uid),
            euid: Uid::new(uid),
            egid: Gid::new(uid),
            groups: Vec::new(),
            caps: Capabilities::empty(),
        }
    }

    /// Replaces the effective uid.
    #[must_use]
    pub fn with_euid(mut self, euid: u32) -> Self {
        self.euid = Uid::new(euid);
        self
    }

    /// Adds a supplementary group.
    #[must_use]
    pub fn with_group(mut self, gid: u32) -> Self {
        self.groups.push(Gid::new(gid));
        self
    }

    /// Replaces the capability set.
    #[must_use]
    pub fn with_caps(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    /// Returns `true` if `gid` is the effective group or a supplementary one.
    pub fn in_group(&self, gid: Gid) -> bool {
        self.egid == gid || self.groups.contains(&gid)
    }
}

/// Pending signals plus the waker of a blocked wait, if any.
///
/// Bit N of `pending` is signal N. Posting a signal wakes the registered
/// waiter so an interruptible wait can observe it and bail out.
pub struct SignalState {
    pending: AtomicU64,
    waiter: SpinLock<Option<Waker>>,
}

impl SignalState {
    /// Creates a state with nothing pending.
    pub const fn new() -> Self {
        Self {
            pending: AtomicU64::new(0),
            waiter: SpinLock::new(None),
        }
    }

    /// Sets the pending bit for `signum` (1..=63) and wakes the waiter.
    pub fn post(&self, signum: u32) {
        if !(1..64).contains(&signum) {
            return;
        }
        self.pending.fetch_or(1u64 << signum, Ordering::Release);
        let waker = self.waiter.lock().take();
        if let Some(w) = waker {
            w.wake();
        }
    }

    /// Returns `true` if any signal is pending.
    pub fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }

    /// Clears every pending signal.
    pub fn clear(&self) {
        self.pending.store(0, Ordering::Release);
    }

    /// Parks `waker` to be woken by the next [`post`](Self::post).
    pub fn register_waker(&self, waker: &Waker) {
        *self.waiter.lock() = Some(waker.clone());
    }

    /// Drops the parked waker.
    pub fn clear_waker(&self) {
        self.waiter.lock().take();
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// A thread calling into a driver.
pub struct Task {
    pid: Pid,
    tid: Pid,
    ns_pid: Pid,
    ns_tid: Pid,
    creds: Credentials,
    ns: Arc<DevNamespace>,
    signals: SignalState,
}

impl Task {
    /// Creates a single-threaded task in `ns` whose namespace-local ids match
    /// its global ones.
    pub fn new(pid: u32, ns: &Arc<DevNamespace>, creds: Credentials) -> Self {
        let pid = Pid::new(pid);
        Self {
            pid,
            tid: pid,
            ns_pid: pid,
            ns_tid: pid,
            creds,
            ns: ns.clone(),
            signals: SignalState::new(),
        }
    }

    /// Sets the thread id (global and namespace-local alike).
    #[must_use]
    pub fn with_tid(mut self, tid: u32) -> Self {
        self.tid = Pid::new(tid);
        self.ns_tid = Pid::new(tid);
        self
    }

    /// Sets the pid and tid as seen from inside the task's namespace.
    #[must_use]
    pub fn with_ns_ids(mut self, ns_pid: u32, ns_tid: u32) -> Self {
        self.ns_pid = Pid::new(ns_pid);
        self.ns_tid = Pid::new(ns_tid);
        self
    }

    /// Global process id.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Global thread id.
    pub fn tid(&self) -> Pid {
        self.tid
    }

    /// Process id inside the task's namespace.
    pub fn ns_pid(&self) -> Pid {
        self.ns_pid
    }

    /// Thread id inside the task's namespace.
    pub fn ns_tid(&self) -> Pid {
        self.ns_tid
    }

    /// Credentials.
    pub fn creds(&self) -> &Credentials {
        &self.creds
    }

    /// Effective uid.
    pub fn euid(&self) -> Uid {
        self.creds.euid
    }

    /// Returns `true` if the task holds every capability in `caps`.
    pub fn capable(&self, caps: Capabilities) -> bool {
        self.creds.caps.contains(caps)
    }

    /// Returns `true` if the task is a member of `gid`.
    pub fn in_group(&self, gid: Gid) -> bool {
        self.creds.in_group(gid)
    }

    /// The device namespace the task belongs to.
    pub fn ns(&self) -> &Arc<DevNamespace> {
        &self.ns
    }

    /// Signal state.
    pub fn signals(&self) -> &SignalState {
        &self.signals
    }

    /// Posts `signum` to the task.
    pub fn send_signal(&self, signum: u32) {
        self.signals.post(signum);
    }

    /// Returns `true` if a signal is pending.
    pub fn has_pending_signal(&self) -> bool {
        self.signals.has_pending()
    }

    /// Discards pending signals, as signal delivery would.
    pub fn clear_signals(&self) {
        self.signals.clear();
    }
}
