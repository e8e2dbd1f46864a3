//! Clock source shared by the drivers.
//!
//! [`SystemClock`] is a host-driven clock: the tick source calls
//! [`SystemClock::advance`] and everything else derives from the monotonic
//! nanosecond counter. `CLOCK_REALTIME` is kept as an offset from monotonic
//! so setting the wall clock never moves monotonic or boot time.

use core::fmt;

use crate::config::NSEC_PER_TICK;
use crate::sync::SpinLock;

/// Nanoseconds per second.
pub const NSEC_PER_SEC: i64 = 1_000_000_000;

/// A `struct timespec`: seconds plus nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timespec {
    /// Whole seconds.
    pub tv_sec: i64,
    /// Nanoseconds, `0..NSEC_PER_SEC` when valid.
    pub tv_nsec: i64,
}

impl Timespec {
    /// The zero timespec.
    pub const ZERO: Self = Self::new(0, 0);

    /// Creates a timespec without validating it.
    pub const fn new(tv_sec: i64, tv_nsec: i64) -> Self {
        Self { tv_sec, tv_nsec }
    }

    /// Builds a normalized timespec from a nanosecond count.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self {
            tv_sec: nanos.div_euclid(NSEC_PER_SEC),
            tv_nsec: nanos.rem_euclid(NSEC_PER_SEC),
        }
    }

    /// Returns `true` if the nanosecond field is in range and seconds are
    /// not negative.
    pub const fn is_valid(&self) -> bool {
        self.tv_sec >= 0 && self.tv_nsec >= 0 && self.tv_nsec < NSEC_PER_SEC
    }

    /// Total nanoseconds, saturating at `i64::MAX`.
    pub const fn as_nanos(&self) -> i64 {
        self.tv_sec
            .saturating_mul(NSEC_PER_SEC)
            .saturating_add(self.tv_nsec)
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.tv_sec, self.tv_nsec)
    }
}

struct ClockState {
    /// Nanoseconds since boot, excluding suspend.
    mono_ns: i64,
    /// Nanoseconds spent suspended.
    sleep_ns: i64,
    /// `realtime - monotonic`.
    wall_offset_ns: i64,
}

/// Monotonic, boot, and wall clocks driven by a single counter.
pub struct SystemClock {
    state: SpinLock<ClockState>,
}

impl SystemClock {
    /// Creates a clock at boot with the wall clock at the epoch.
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(ClockState {
                mono_ns: 0,
                sleep_ns: 0,
                wall_offset_ns: 0,
            }),
        }
    }

    /// `CLOCK_REALTIME`.
    pub fn realtime(&self) -> Timespec {
        let s = self.state.lock();
        Timespec::from_nanos(s.mono_ns.saturating_add(s.wall_offset_ns))
    }

    /// `CLOCK_MONOTONIC`.
    pub fn monotonic(&self) -> Timespec {
        Timespec::from_nanos(self.state.lock().mono_ns)
    }

    /// `CLOCK_BOOTTIME`: monotonic plus time spent suspended.
    pub fn boottime(&self) -> Timespec {
        let s = self.state.lock();
        Timespec::from_nanos(s.mono_ns.saturating_add(s.sleep_ns))
    }

    /// Steps the wall clock to `ts`. Monotonic and boot time are unaffected.
    ///
    /// The caller validates `ts`.
    pub fn set_realtime(&self, ts: Timespec) {
        let mut s = self.state.lock();
        s.wall_offset_ns = ts.as_nanos().saturating_sub(s.mono_ns);
        log::debug!("clock: realtime set to {ts}");
    }

    /// Advances monotonic (and therefore every clock) by `nanos`.
    pub fn advance(&self, nanos: u64) {
        let delta = i64::try_from(nanos).unwrap_or(i64::MAX);
        let mut s = self.state.lock();
        s.mono_ns = s.mono_ns.saturating_add(delta);
    }

    /// Records `nanos` spent in suspend: boot and wall time move, monotonic
    /// does not.
    pub fn suspend(&self, nanos: u64) {
        let delta = i64::try_from(nanos).unwrap_or(i64::MAX);
        let mut s = self.state.lock();
        s.sleep_ns = s.sleep_ns.saturating_add(delta);
        s.wall_offset_ns = s.wall_offset_ns.saturating_add(delta);
    }

    /// Timer ticks since boot.
    #[allow(clippy::cast_sign_loss, reason = "mono_ns only grows from zero")]
    pub fn ticks(&self) -> u64 {
        self.state.lock().mono_ns as u64 / NSEC_PER_TICK
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timespec_validation() {
        assert!(Timespec::new(5, 0).is_valid());
        assert!(Timespec::new(5, NSEC_PER_SEC - 1).is_valid());
        assert!(!Timespec::new(5, NSEC_PER_SEC).is_valid());
        assert!(!Timespec::new(-1, 0).is_valid());
        assert!(!Timespec::new(0, -1).is_valid());
    }

    #[test]
    fn from_nanos_normalizes() {
        assert_eq!(Timespec::from_nanos(1_500_000_000), Timespec::new(1, 500_000_000));
        assert_eq!(Timespec::from_nanos(-1), Timespec::new(-1, NSEC_PER_SEC - 1));
    }

    #[test]
    fn set_realtime_leaves_monotonic() {
        let clock = SystemClock::new();
        clock.advance(2_000_000_000);
        clock.set_realtime(Timespec::new(1_000, 0));
        assert_eq!(clock.monotonic(), Timespec::new(2, 0));
        assert_eq!(clock.realtime(), Timespec::new(1_000, 0));

        clock.advance(500_000_000);
        assert_eq!(clock.realtime(), Timespec::new(1_000, 500_000_000));
    }

    #[test]
    fn suspend_moves_boottime_only() {
        let clock = SystemClock::new();
        clock.advance(1_000_000_000);
        clock.suspend(3_000_000_000);
        assert_eq!(clock.monotonic(), Timespec::new(1, 0));
        assert_eq!(clock.boottime(), Timespec::new(4, 0));
        assert_eq!(clock.realtime(), Timespec::new(4, 0));
    }

    #[test]
    fn ticks_follow_hz() {
        let clock = SystemClock::new();
        clock.advance(NSEC_PER_TICK * 7 + 1);
        assert_eq!(clock.ticks(), 7);
    }

    #[test]
    fn display_pads_nanos() {
        assert_eq!(format!("{}", Timespec::new(3, 42)), "3.000000042");
    }
}
