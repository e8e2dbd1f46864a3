//! Per-namespace alarm state.

use alloc::format;
use alloc::sync::Arc;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use devns_core::power::{PowerManager, WakeLock};
use devns_core::sync::{SpinLock, WaitQueue};
use devns_core::task::Task;
use devns_core::time::Timespec;
use devns_core::{DevError, Pid};

use super::timer::{AlarmTimer, AlarmTimerQueue};
use super::{ALARM_TYPE_COUNT, AlarmMask, AlarmType};
use crate::config::{ALARM_WAKE_LOCK_PREFIX, ALARM_WAKE_LOCK_TIMEOUT_TICKS};

struct AlarmInner {
    /// A writable handle holds the device in this namespace.
    opened: bool,
    /// Alarms that fired (and time changes) not yet collected by a wait.
    pending: AlarmMask,
    /// Alarms that are armed and have not fired.
    enabled: AlarmMask,
    /// A wait returned results the caller has not acknowledged by waiting
    /// again; the wake lock stays held until it does.
    wait_pending: bool,
}

/// Everything the alarm device keeps for one namespace.
pub struct AlarmState {
    init_pid: Pid,
    inner: SpinLock<AlarmInner>,
    waiters: WaitQueue,
    wake_lock: WakeLock,
    timers: [Arc<AlarmTimer>; ALARM_TYPE_COUNT],
    queue: Arc<AlarmTimerQueue>,
}

impl AlarmState {
    pub(super) fn new(init_pid: Pid, power: &Arc<PowerManager>, queue: Arc<AlarmTimerQueue>) -> Arc<Self> {
        let wake_lock = power.wake_lock(&format!("{ALARM_WAKE_LOCK_PREFIX}{init_pid}"));
        Arc::new_cyclic(|me| Self {
            init_pid,
            inner: SpinLock::new(AlarmInner {
                opened: false,
                pending: AlarmMask::empty(),
                enabled: AlarmMask::empty(),
                wait_pending: false,
            }),
            waiters: WaitQueue::new(),
            wake_lock,
            timers: AlarmType::ARMABLE.map(|kind| AlarmTimer::new(kind, me.clone())),
            queue,
        })
    }

    /// Init pid of the owning namespace.
    pub fn init_pid(&self) -> Pid {
        self.init_pid
    }

    /// Alarms waiting to be collected.
    pub fn pending(&self) -> AlarmMask {
        self.inner.lock().pending
    }

    /// Armed alarms.
    pub fn enabled(&self) -> AlarmMask {
        self.inner.lock().enabled
    }

    /// Returns `true` while a writable handle holds the device.
    pub fn is_opened(&self) -> bool {
        self.inner.lock().opened
    }

    /// Returns `true` if a wait's result is not yet acknowledged.
    pub fn wait_pending(&self) -> bool {
        self.inner.lock().wait_pending
    }

    /// Returns `true` while this namespace's alarm wake lock is held.
    pub fn wake_lock_active(&self) -> bool {
        self.wake_lock.is_active()
    }

    /// Name of this namespace's wake lock.
    pub fn wake_lock_name(&self) -> &str {
        self.wake_lock.name()
    }

    /// Number of tasks blocked in a wait.
    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Timer backing `kind`.
    pub fn timer(&self, kind: AlarmType) -> Option<&Arc<AlarmTimer>> {
        kind.timer_index().map(|i| &self.timers[i])
    }

    pub(super) fn claim(&self) -> Result<(), DevError> {
        let mut inner = self.inner.lock();
        if inner.opened {
            log::debug!("alarm: device already open in namespace {}", self.init_pid);
            return Err(DevError::Busy);
        }
        inner.opened = true;
        Ok(())
    }

    /// Undoes a claim: disarms everything, drops pending results and the
    /// wake lock, and frees the device for the next opener.
    pub(super) fn release_claim(&self) {
        let mut inner = self.inner.lock();
        for kind in AlarmType::ARMABLE {
            if inner.enabled.contains(kind.mask()) {
                inner.enabled.remove(kind.mask());
                if let Some(timer) = self.timer(kind) {
                    self.queue.cancel(timer);
                }
            }
        }
        if !inner.pending.is_empty() || inner.wait_pending {
            if !inner.pending.is_empty() {
                log::debug!(
                    "alarm: release with pending alarms {:#x} in namespace {}",
                    inner.pending.bits(),
                    self.init_pid
                );
            }
            self.wake_lock.unlock();
            inner.pending = AlarmMask::empty();
            inner.wait_pending = false;
        }
        inner.opened = false;
    }

    pub(super) fn clear(&self, kind: AlarmType) {
        let mask = kind.mask();
        let mut inner = self.inner.lock();
        if let Some(timer) = self.timer(kind) {
            self.queue.cancel(timer);
        }
        if inner.pending.contains(mask) {
            inner.pending.remove(mask);
            if inner.pending.is_empty() && !inner.wait_pending {
                self.wake_lock.unlock();
            }
        }
        inner.enabled.remove(mask);
    }

    pub(super) fn set(&self, kind: AlarmType, at: Timespec) {
        let mut inner = self.inner.lock();
        inner.enabled.insert(kind.mask());
        if let Some(timer) = self.timer(kind) {
            self.queue.arm(timer, at);
        }
    }

    /// Records a wall-clock step and wakes every waiter.
    pub(super) fn time_changed(&self) {
        self.inner.lock().pending.insert(AlarmMask::TIME_CHANGE);
        self.waiters.wake_all();
    }

    /// Timer expiry path. `seq` is the timer's sequence when it was pulled
    /// off the queue; a timer re-armed or cancelled since then does nothing.
    pub(super) fn fire(&self, timer: &AlarmTimer, seq: u64) {
        let mask = timer.kind().mask();
        {
            let mut inner = self.inner.lock();
            if timer.seq() != seq || !inner.enabled.contains(mask) {
                return;
            }
            self.wake_lock.lock_timeout(ALARM_WAKE_LOCK_TIMEOUT_TICKS);
            inner.enabled.remove(mask);
            inner.pending.insert(mask);
        }
        log::trace!("alarm: {:?} fired in namespace {}", timer.kind(), self.init_pid);
        self.waiters.wake_all();
    }

    /// Collects pending alarms, or returns `None` if nothing is pending.
    fn take_pending(&self) -> Option<AlarmMask> {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() {
            return None;
        }
        let fired = inner.pending;
        inner.wait_pending = true;
        inner.pending = AlarmMask::empty();
        Some(fired)
    }

    /// Start of a wait: a caller waiting again with nothing pending has
    /// acknowledged the previous result, so the wake lock can go.
    fn begin_wait(&self) {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() && inner.wait_pending {
            self.wake_lock.unlock();
            inner.wait_pending = false;
        }
    }

    /// Blocks until an alarm is pending or `task` is signalled.
    pub(super) fn wait<'a>(self: &'a Arc<Self>, task: &'a Task) -> AlarmWaitFuture<'a> {
        self.begin_wait();
        AlarmWaitFuture { state: self, task }
    }

    /// Cancels every timer. Runs when the namespace's payload is destroyed.
    pub(super) fn shutdown(&self) {
        let mut inner = self.inner.lock();
        for timer in &self.timers {
            self.queue.cancel(timer);
        }
        inner.enabled = AlarmMask::empty();
        inner.pending = AlarmMask::empty();
        self.wake_lock.unlock();
        log::debug!("alarm: namespace {} state torn down", self.init_pid);
    }
}

/// Future of an interruptible alarm wait.
///
/// Resolves to the pending mask, or to [`DevError::Interrupted`] if a signal
/// arrives first. The namespace lock is only taken inside each poll, never
/// across a suspension.
pub struct AlarmWaitFuture<'a> {
    state: &'a Arc<AlarmState>,
    task: &'a Task,
}

impl Future for AlarmWaitFuture<'_> {
    type Output = Result<AlarmMask, DevError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(fired) = this.state.take_pending() {
            return Poll::Ready(Ok(fired));
        }
        if this.task.has_pending_signal() {
            return Poll::Ready(Err(DevError::Interrupted));
        }

        this.state.waiters.register(cx.waker());
        this.task.signals().register_waker(cx.waker());

        // Re-check after registration (catches a fire or signal between the
        // first check and the subscribe).
        if let Some(fired) = this.state.take_pending() {
            this.task.signals().clear_waker();
            return Poll::Ready(Ok(fired));
        }
        if this.task.has_pending_signal() {
            return Poll::Ready(Err(DevError::Interrupted));
        }
        Poll::Pending
    }
}

impl Drop for AlarmWaitFuture<'_> {
    fn drop(&mut self) {
        self.task.signals().clear_waker();
    }
}
