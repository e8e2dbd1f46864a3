//! The alarm timer device, one instance per device namespace.
//!
//! Every namespace that opens the device gets its own [`AlarmState`]: the
//! open claim, the pending and enabled masks, a wait queue, a wake lock named
//! after the namespace's init pid, and one timer per alarm type. Alarms set
//! in one namespace are invisible to every other.
//!
//! The exception is [`AlarmCmd::SetRtc`]. Stepping the wall clock changes
//! what every RTC alarm means, so besides marking its own namespace the
//! setter replays the time-change event into every other namespace holding
//! alarm state.

mod state;
mod timer;

use alloc::sync::Arc;

use bitflags::bitflags;
use devns_core::power::PowerManager;
use devns_core::task::{Capabilities, Task};
use devns_core::time::{SystemClock, Timespec};
use devns_core::{DevError, DevNamespace, DevNsRegistry, NsRef, NsRegistration};

use crate::file::OpenFlags;

pub use state::{AlarmState, AlarmWaitFuture};
pub use timer::{AlarmTimer, AlarmTimerQueue, ClockBase};

/// Number of alarm types backed by a timer.
pub const ALARM_TYPE_COUNT: usize = 5;

/// Alarm (and clock) selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum AlarmType {
    /// Wall-clock alarm that wakes the device.
    RtcWakeup = 0,
    /// Wall-clock alarm.
    Rtc = 1,
    /// Boot-time alarm that wakes the device.
    ElapsedRealtimeWakeup = 2,
    /// Boot-time alarm.
    ElapsedRealtime = 3,
    /// Wall-clock alarm that powers the device back on after shutdown.
    PowerOffWakeup = 4,
    /// Monotonic clock; valid for [`AlarmCmd::GetTime`] only.
    SystemTime = 5,
}

impl AlarmType {
    /// Every type that can be armed, in timer order.
    pub const ARMABLE: [Self; ALARM_TYPE_COUNT] = [
        Self::RtcWakeup,
        Self::Rtc,
        Self::ElapsedRealtimeWakeup,
        Self::ElapsedRealtime,
        Self::PowerOffWakeup,
    ];

    /// Bit for this type in an [`AlarmMask`]; empty for `SystemTime`.
    pub fn mask(self) -> AlarmMask {
        match self {
            Self::SystemTime => AlarmMask::empty(),
            other => AlarmMask::from_bits_truncate(1 << other as u32),
        }
    }

    /// Index of this type's timer, if it has one.
    pub fn timer_index(self) -> Option<usize> {
        match self {
            Self::SystemTime => None,
            other => Some(other as usize),
        }
    }

    /// Clock this type's deadlines are measured against.
    pub fn clock_base(self) -> ClockBase {
        match self {
            Self::RtcWakeup | Self::Rtc | Self::PowerOffWakeup => ClockBase::Realtime,
            Self::ElapsedRealtimeWakeup | Self::ElapsedRealtime | Self::SystemTime => ClockBase::Boottime,
        }
    }

    /// Returns `true` for types that wake the device from suspend.
    pub fn is_wakeup(self) -> bool {
        AlarmMask::WAKEUP.contains(self.mask()) && !self.mask().is_empty()
    }

    fn armable(self) -> Result<Self, DevError> {
        if self.timer_index().is_some() {
            Ok(self)
        } else {
            Err(DevError::InvalidArgument)
        }
    }
}

impl TryFrom<u32> for AlarmType {
    type Error = DevError;

    fn try_from(raw: u32) -> Result<Self, DevError> {
        match raw {
            0 => Ok(Self::RtcWakeup),
            1 => Ok(Self::Rtc),
            2 => Ok(Self::ElapsedRealtimeWakeup),
            3 => Ok(Self::ElapsedRealtime),
            4 => Ok(Self::PowerOffWakeup),
            5 => Ok(Self::SystemTime),
            _ => Err(DevError::InvalidArgument),
        }
    }
}

bitflags! {
    /// Set of alarm types, as returned by a wait.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AlarmMask: u32 {
        /// [`AlarmType::RtcWakeup`].
        const RTC_WAKEUP = 1 << 0;
        /// [`AlarmType::Rtc`].
        const RTC = 1 << 1;
        /// [`AlarmType::ElapsedRealtimeWakeup`].
        const ELAPSED_REALTIME_WAKEUP = 1 << 2;
        /// [`AlarmType::ElapsedRealtime`].
        const ELAPSED_REALTIME = 1 << 3;
        /// [`AlarmType::PowerOffWakeup`].
        const POWER_OFF_WAKEUP = 1 << 4;
        /// The wall clock was stepped.
        const TIME_CHANGE = 1 << 16;

        /// Types that wake the device.
        const WAKEUP = Self::RTC_WAKEUP.bits()
            | Self::ELAPSED_REALTIME_WAKEUP.bits()
            | Self::POWER_OFF_WAKEUP.bits();
    }
}

/// Alarm device ioctls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmCmd {
    /// `ANDROID_ALARM_CLEAR(type)`.
    Clear(AlarmType),
    /// `ANDROID_ALARM_SET(type)`: arm at an absolute time.
    Set(AlarmType, Timespec),
    /// `ANDROID_ALARM_SET_OLD(type)`: arm at an absolute `time_t`.
    SetOld(AlarmType, i64),
    /// `ANDROID_ALARM_SET_AND_WAIT(type)`.
    SetAndWait(AlarmType, Timespec),
    /// `ANDROID_ALARM_SET_AND_WAIT_OLD(type)`.
    SetAndWaitOld(AlarmType, i64),
    /// `ANDROID_ALARM_WAIT`.
    Wait,
    /// `ANDROID_ALARM_GET_TIME(type)`.
    GetTime(AlarmType),
    /// `ANDROID_ALARM_SET_RTC`: step the wall clock.
    SetRtc(Timespec),
}

impl AlarmCmd {
    /// Returns `true` for every command a read-only handle may not issue.
    pub fn mutates(&self) -> bool {
        !matches!(self, Self::GetTime(_))
    }

    /// Rejects malformed arguments before any state is touched.
    fn validate(&self) -> Result<(), DevError> {
        match *self {
            Self::Clear(kind)
            | Self::Set(kind, _)
            | Self::SetOld(kind, _)
            | Self::SetAndWait(kind, _)
            | Self::SetAndWaitOld(kind, _) => kind.armable().map(drop),
            Self::SetRtc(ts) if !ts.is_valid() => Err(DevError::InvalidArgument),
            Self::Wait | Self::GetTime(_) | Self::SetRtc(_) => Ok(()),
        }
    }
}

/// Result of an alarm ioctl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmReply {
    /// The command completed with nothing to return.
    Done,
    /// Clock reading from [`AlarmCmd::GetTime`].
    Time(Timespec),
    /// Alarms collected by a wait.
    Fired(AlarmMask),
}

/// The alarm device.
pub struct AlarmDevice {
    states: NsRegistration<Arc<AlarmState>>,
    clock: Arc<SystemClock>,
    timers: Arc<AlarmTimerQueue>,
}

impl AlarmDevice {
    /// Registers the alarm payload with `registry`.
    pub fn new(
        registry: &Arc<DevNsRegistry>,
        clock: Arc<SystemClock>,
        power: Arc<PowerManager>,
        timers: Arc<AlarmTimerQueue>,
    ) -> Arc<Self> {
        let queue = timers.clone();
        let states = registry.register(
            "alarm",
            move |ns| Ok(AlarmState::new(ns.init_pid(), &power, queue.clone())),
            |state: &Arc<AlarmState>| state.shutdown(),
        );
        Arc::new(Self { states, clock, timers })
    }

    /// Opens the device for `task`.
    ///
    /// A writable open claims the device in the caller's namespace; a
    /// read-only open only reads clocks and claims nothing.
    ///
    /// # Errors
    ///
    /// [`DevError::Busy`] if another writable handle holds the device in
    /// this namespace, [`DevError::OutOfMemory`] if the namespace's alarm
    /// state cannot be allocated.
    pub fn open(self: &Arc<Self>, task: &Task, flags: OpenFlags) -> Result<AlarmFile, DevError> {
        let state = self.states.acquire_current(task)?;
        let claimed = !flags.is_read_only();
        if claimed {
            state.claim()?;
        }
        Ok(AlarmFile {
            dev: self.clone(),
            state,
            flags,
            claimed,
        })
    }

    /// `ns`'s alarm state, if the namespace has touched the device.
    pub fn state(&self, ns: &Arc<DevNamespace>) -> Option<NsRef<Arc<AlarmState>>> {
        self.states.get(ns)
    }

    /// The timer base alarms are armed on.
    pub fn timers(&self) -> &Arc<AlarmTimerQueue> {
        &self.timers
    }

    /// Replays a time-change event into every namespace other than `origin`.
    /// Returns how many namespaces were notified.
    pub fn propagate_time_change(&self, origin: &DevNamespace) -> usize {
        let mut notified = 0;
        self.states.for_each_live(|ns, state| {
            if ns.id() != origin.id() {
                state.time_changed();
                notified += 1;
            }
        });
        log::info!(
            "alarm: time change from namespace {} propagated to {notified} other namespaces",
            origin.init_pid()
        );
        notified
    }

    fn read_clock(&self, kind: AlarmType) -> Timespec {
        match kind {
            AlarmType::RtcWakeup | AlarmType::Rtc | AlarmType::PowerOffWakeup => self.clock.realtime(),
            AlarmType::ElapsedRealtimeWakeup | AlarmType::ElapsedRealtime => self.clock.boottime(),
            AlarmType::SystemTime => self.clock.monotonic(),
        }
    }

    fn set_rtc(&self, task: &Task, state: &AlarmState, ts: Timespec) -> Result<(), DevError> {
        if !task.capable(Capabilities::SYS_TIME) {
            log::debug!("alarm: pid {} may not set the clock", task.pid());
            return Err(DevError::PermissionDenied);
        }
        self.clock.set_realtime(ts);
        state.time_changed();
        self.propagate_time_change(task.ns());
        Ok(())
    }
}

/// An open handle on the alarm device.
///
/// Holds a reference to its namespace's alarm state from open until
/// release; dropping the handle releases it.
pub struct AlarmFile {
    dev: Arc<AlarmDevice>,
    state: NsRef<Arc<AlarmState>>,
    flags: OpenFlags,
    claimed: bool,
}

impl AlarmFile {
    /// The namespace this handle was opened in.
    pub fn ns(&self) -> &Arc<DevNamespace> {
        self.state.ns()
    }

    /// Access mode.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Runs `cmd` on behalf of `task`.
    ///
    /// Only the wait commands suspend; everything else completes on the
    /// first poll.
    ///
    /// # Errors
    ///
    /// [`DevError::PermissionDenied`] for a mutating command on a read-only
    /// handle (or `SetRtc` without `CAP_SYS_TIME`),
    /// [`DevError::InvalidArgument`] for a bad type or time,
    /// [`DevError::OutOfMemory`] if the caller's alarm state cannot be
    /// allocated, [`DevError::Interrupted`] if a wait is signalled.
    pub async fn ioctl(&self, task: &Task, cmd: AlarmCmd) -> Result<AlarmReply, DevError> {
        if self.flags.is_read_only() && cmd.mutates() {
            return Err(DevError::PermissionDenied);
        }
        cmd.validate()?;

        let state = self.dev.states.acquire_current(task)?;
        match cmd {
            AlarmCmd::Clear(kind) => {
                state.clear(kind);
                Ok(AlarmReply::Done)
            }
            AlarmCmd::Set(kind, at) => {
                state.set(kind, at);
                Ok(AlarmReply::Done)
            }
            AlarmCmd::SetOld(kind, secs) => {
                state.set(kind, Timespec::new(secs, 0));
                Ok(AlarmReply::Done)
            }
            AlarmCmd::SetAndWait(kind, at) => {
                state.set(kind, at);
                state.wait(task).await.map(AlarmReply::Fired)
            }
            AlarmCmd::SetAndWaitOld(kind, secs) => {
                state.set(kind, Timespec::new(secs, 0));
                state.wait(task).await.map(AlarmReply::Fired)
            }
            AlarmCmd::Wait => state.wait(task).await.map(AlarmReply::Fired),
            AlarmCmd::GetTime(kind) => Ok(AlarmReply::Time(self.dev.read_clock(kind))),
            AlarmCmd::SetRtc(ts) => self.dev.set_rtc(task, &state, ts).map(|()| AlarmReply::Done),
        }
    }

    /// Closes the handle. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Drop for AlarmFile {
    fn drop(&mut self) {
        if self.claimed {
            self.state.release_claim();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::task::{Context, Poll};
    use devns_core::config::NSEC_PER_TICK;
    use devns_core::sync::test_waker::{block_on, counting_waker, noop_waker};
    use devns_core::{Credentials, NsTag, Pid};
    use std::sync::atomic::Ordering;

    struct Rig {
        registry: Arc<DevNsRegistry>,
        clock: Arc<SystemClock>,
        power: Arc<PowerManager>,
        dev: Arc<AlarmDevice>,
    }

    fn rig() -> Rig {
        let registry = DevNsRegistry::new();
        let clock = Arc::new(SystemClock::new());
        let power = PowerManager::new(clock.clone());
        let timers = AlarmTimerQueue::new(clock.clone());
        let dev = AlarmDevice::new(&registry, clock.clone(), power.clone(), timers);
        Rig {
            registry,
            clock,
            power,
            dev,
        }
    }

    fn root_task(rig: &Rig) -> Task {
        Task::new(100, rig.registry.root(), Credentials::root())
    }

    fn ioctl(file: &AlarmFile, task: &Task, cmd: AlarmCmd) -> Result<AlarmReply, DevError> {
        block_on(file.ioctl(task, cmd))
    }

    #[test]
    fn second_writable_open_is_busy() {
        let rig = rig();
        let task = root_task(&rig);
        let first = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        assert_eq!(rig.dev.open(&task, OpenFlags::RDWR).err(), Some(DevError::Busy));

        first.release();
        assert!(rig.dev.open(&task, OpenFlags::RDWR).is_ok());
    }

    #[test]
    fn read_only_open_coexists_and_cannot_mutate() {
        let rig = rig();
        let task = root_task(&rig);
        let _writer = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        let reader = rig.dev.open(&task, OpenFlags::READ).unwrap();

        assert_eq!(
            ioctl(&reader, &task, AlarmCmd::Set(AlarmType::Rtc, Timespec::new(5, 0))),
            Err(DevError::PermissionDenied)
        );
        assert_eq!(ioctl(&reader, &task, AlarmCmd::Wait), Err(DevError::PermissionDenied));
        assert!(matches!(
            ioctl(&reader, &task, AlarmCmd::GetTime(AlarmType::Rtc)),
            Ok(AlarmReply::Time(_))
        ));
    }

    #[test]
    fn bad_type_rejected() {
        let rig = rig();
        let task = root_task(&rig);
        let file = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        assert_eq!(AlarmType::try_from(9), Err(DevError::InvalidArgument));
        assert_eq!(
            ioctl(&file, &task, AlarmCmd::Set(AlarmType::SystemTime, Timespec::new(1, 0))),
            Err(DevError::InvalidArgument)
        );
        assert_eq!(
            ioctl(&file, &task, AlarmCmd::Clear(AlarmType::SystemTime)),
            Err(DevError::InvalidArgument)
        );
        assert_eq!(rig.dev.timers().armed(), 0);
    }

    #[test]
    fn get_time_reads_matching_clock() {
        let rig = rig();
        let task = root_task(&rig);
        let file = rig.dev.open(&task, OpenFlags::READ).unwrap();
        rig.clock.advance(3_000_000_000);
        rig.clock.suspend(2_000_000_000);
        rig.clock.set_realtime(Timespec::new(1_000, 0));

        let time = |kind| match ioctl(&file, &task, AlarmCmd::GetTime(kind)) {
            Ok(AlarmReply::Time(ts)) => ts,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(time(AlarmType::Rtc), Timespec::new(1_000, 0));
        assert_eq!(time(AlarmType::ElapsedRealtime), Timespec::new(5, 0));
        assert_eq!(time(AlarmType::SystemTime), Timespec::new(3, 0));
    }

    #[test]
    fn fired_alarm_is_collected_by_wait() {
        let rig = rig();
        let task = root_task(&rig);
        let file = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        ioctl(&file, &task, AlarmCmd::Set(AlarmType::ElapsedRealtimeWakeup, Timespec::new(1, 0))).unwrap();
        let state = rig.dev.state(rig.registry.root()).unwrap();
        assert_eq!(state.enabled(), AlarmMask::ELAPSED_REALTIME_WAKEUP);

        rig.clock.advance(1_000_000_000);
        assert_eq!(rig.dev.timers().run_expired(), 1);
        assert_eq!(state.pending(), AlarmMask::ELAPSED_REALTIME_WAKEUP);
        assert!(state.enabled().is_empty());
        assert!(state.wake_lock_active());
        assert_eq!(rig.power.active_locks(), ["alarm_1"]);

        let reply = ioctl(&file, &task, AlarmCmd::Wait).unwrap();
        assert_eq!(reply, AlarmReply::Fired(AlarmMask::ELAPSED_REALTIME_WAKEUP));
        assert!(state.pending().is_empty());
        assert!(state.wait_pending());
    }

    #[test]
    fn fire_holds_wake_lock_for_bounded_ticks() {
        let rig = rig();
        let task = root_task(&rig);
        let file = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        ioctl(&file, &task, AlarmCmd::SetOld(AlarmType::Rtc, 2)).unwrap();
        rig.clock.advance(2_000_000_000);
        rig.dev.timers().run_expired();

        let state = rig.dev.state(rig.registry.root()).unwrap();
        rig.clock.advance(NSEC_PER_TICK * 4);
        assert!(state.wake_lock_active());
        rig.clock.advance(NSEC_PER_TICK);
        assert!(!state.wake_lock_active());
    }

    #[test]
    fn waiting_again_acknowledges_previous_result() {
        let rig = rig();
        let task = root_task(&rig);
        let file = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        let state = rig.dev.state(rig.registry.root()).unwrap();
        ioctl(&file, &task, AlarmCmd::Set(AlarmType::RtcWakeup, Timespec::ZERO)).unwrap();
        rig.dev.timers().run_expired();
        ioctl(&file, &task, AlarmCmd::Wait).unwrap();
        assert!(state.wait_pending());

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = core::pin::pin!(file.ioctl(&task, AlarmCmd::Wait));
        assert!(fut.as_mut().poll(&mut cx).is_pending());
        assert!(!state.wait_pending());
        assert!(!state.wake_lock_active());
        assert_eq!(state.waiters(), 1);
    }

    #[test]
    fn clear_cancels_and_drops_wake_lock() {
        let rig = rig();
        let task = root_task(&rig);
        let file = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        let state = rig.dev.state(rig.registry.root()).unwrap();

        ioctl(&file, &task, AlarmCmd::Set(AlarmType::Rtc, Timespec::new(60, 0))).unwrap();
        ioctl(&file, &task, AlarmCmd::Clear(AlarmType::Rtc)).unwrap();
        assert!(state.enabled().is_empty());
        rig.clock.advance(120_000_000_000);
        assert_eq!(rig.dev.timers().run_expired(), 0);

        ioctl(&file, &task, AlarmCmd::Set(AlarmType::RtcWakeup, Timespec::ZERO)).unwrap();
        rig.dev.timers().run_expired();
        assert!(state.wake_lock_active());
        ioctl(&file, &task, AlarmCmd::Clear(AlarmType::RtcWakeup)).unwrap();
        assert!(state.pending().is_empty());
        assert!(!state.wake_lock_active());
    }

    #[test]
    fn wait_interrupted_by_signal_leaves_state_intact() {
        let rig = rig();
        let task = root_task(&rig);
        let file = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        ioctl(&file, &task, AlarmCmd::Set(AlarmType::Rtc, Timespec::new(100, 0))).unwrap();
        let state = rig.dev.state(rig.registry.root()).unwrap();

        let (waker, wakes) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = core::pin::pin!(file.ioctl(&task, AlarmCmd::Wait));
        assert!(fut.as_mut().poll(&mut cx).is_pending());

        task.send_signal(2);
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert_eq!(fut.as_mut().poll(&mut cx), Poll::Ready(Err(DevError::Interrupted)));
        assert_eq!(state.enabled(), AlarmMask::RTC);
        assert!(state.pending().is_empty());
        assert!(!state.wait_pending());
    }

    #[test]
    fn wait_woken_by_fire() {
        let rig = rig();
        let task = root_task(&rig);
        let file = rig.dev.open(&task, OpenFlags::RDWR).unwrap();

        let (waker, wakes) = counting_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = core::pin::pin!(file.ioctl(&task, AlarmCmd::SetAndWait(AlarmType::Rtc, Timespec::new(1, 0))));
        assert!(fut.as_mut().poll(&mut cx).is_pending());

        rig.clock.advance(1_000_000_000);
        rig.dev.timers().run_expired();
        assert!(wakes.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            fut.as_mut().poll(&mut cx),
            Poll::Ready(Ok(AlarmReply::Fired(AlarmMask::RTC)))
        );
    }

    #[test]
    fn release_disarms_and_clears() {
        let rig = rig();
        let task = root_task(&rig);
        let file = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        ioctl(&file, &task, AlarmCmd::Set(AlarmType::Rtc, Timespec::new(100, 0))).unwrap();
        ioctl(&file, &task, AlarmCmd::Set(AlarmType::RtcWakeup, Timespec::ZERO)).unwrap();
        rig.dev.timers().run_expired();
        let state = rig.dev.state(rig.registry.root()).unwrap();
        assert_eq!(rig.dev.timers().armed(), 1);

        file.release();
        assert_eq!(rig.dev.timers().armed(), 0);
        assert!(state.enabled().is_empty());
        assert!(state.pending().is_empty());
        assert!(!state.wake_lock_active());
        assert!(!state.is_opened());
    }

    #[test]
    fn set_rtc_marks_every_namespace() {
        let rig = rig();
        let root = root_task(&rig);
        let ns_a = rig.registry.create_namespace(Pid::new(200), NsTag::from_name("a")).unwrap();
        let ns_b = rig.registry.create_namespace(Pid::new(300), NsTag::from_name("b")).unwrap();
        let task_a = Task::new(201, &ns_a, Credentials::user(10_000));
        let _untouched = rig.registry.create_namespace(Pid::new(400), NsTag::from_name("c")).unwrap();

        let file_root = rig.dev.open(&root, OpenFlags::RDWR).unwrap();
        let _file_a = rig.dev.open(&task_a, OpenFlags::RDWR).unwrap();
        let task_b = Task::new(301, &ns_b, Credentials::root());
        let file_b = rig.dev.open(&task_b, OpenFlags::RDWR).unwrap();

        ioctl(&file_b, &task_b, AlarmCmd::SetRtc(Timespec::new(5_000, 0))).unwrap();
        assert_eq!(rig.clock.realtime(), Timespec::new(5_000, 0));
        for ns in [rig.registry.root(), &ns_a, &ns_b] {
            assert_eq!(rig.dev.state(ns).unwrap().pending(), AlarmMask::TIME_CHANGE);
        }
        assert_eq!(
            ioctl(&file_root, &root, AlarmCmd::Wait),
            Ok(AlarmReply::Fired(AlarmMask::TIME_CHANGE))
        );
    }

    #[test]
    fn set_rtc_validates_and_checks_capability() {
        let rig = rig();
        let root = root_task(&rig);
        let file = rig.dev.open(&root, OpenFlags::RDWR).unwrap();
        assert_eq!(
            ioctl(&file, &root, AlarmCmd::SetRtc(Timespec::new(1, 2_000_000_000))),
            Err(DevError::InvalidArgument)
        );
        let state = rig.dev.state(rig.registry.root()).unwrap();
        assert!(state.pending().is_empty());

        let user = Task::new(500, rig.registry.root(), Credentials::user(10_000));
        assert_eq!(
            ioctl(&file, &user, AlarmCmd::SetRtc(Timespec::new(10, 0))),
            Err(DevError::PermissionDenied)
        );
        assert_eq!(rig.clock.realtime(), Timespec::ZERO);
    }

    #[test]
    fn open_reports_oom_without_claiming() {
        let rig = rig();
        let task = root_task(&rig);
        rig.registry.inject_create_failures(1);
        assert_eq!(rig.dev.open(&task, OpenFlags::RDWR).err(), Some(DevError::OutOfMemory));
        assert!(rig.dev.state(rig.registry.root()).is_none());
        assert!(rig.dev.open(&task, OpenFlags::RDWR).is_ok());
    }

    #[test]
    fn wake_lock_named_after_init_pid() {
        let rig = rig();
        let ns = rig.registry.create_namespace(Pid::new(812), NsTag::from_name("w")).unwrap();
        let task = Task::new(900, &ns, Credentials::root());
        let _file = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        assert_eq!(rig.dev.state(&ns).unwrap().wake_lock_name(), "alarm_812");
    }

    #[test]
    fn teardown_cancels_timers_after_last_ref() {
        let rig = rig();
        let ns = rig.registry.create_namespace(Pid::new(200), NsTag::from_name("a")).unwrap();
        let task = Task::new(201, &ns, Credentials::root());
        let file = rig.dev.open(&task, OpenFlags::RDWR).unwrap();
        ioctl(&file, &task, AlarmCmd::Set(AlarmType::Rtc, Timespec::new(50, 0))).unwrap();

        rig.registry.destroy_namespace(&ns).unwrap();
        assert_eq!(rig.power.registered(), 1);
        assert!(file.state.is_opened());

        // The handle's release still runs against live state.
        file.release();
        assert_eq!(rig.dev.timers().armed(), 0);
        assert_eq!(rig.power.registered(), 0);
    }
}
