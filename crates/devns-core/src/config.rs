//! Compile-time configuration for the namespace core.

use crate::id::Pid;
use crate::ns::NsTag;

/// Timer interrupt frequency. One tick is `1_000_000_000 / HZ` nanoseconds.
pub const HZ: u64 = 100;

/// Nanoseconds per timer tick.
pub const NSEC_PER_TICK: u64 = 1_000_000_000 / HZ;

/// Init pid of the root (host) namespace.
pub const ROOT_INIT_PID: Pid = Pid::new(1);

/// Tag of the root namespace.
pub const ROOT_TAG: NsTag = NsTag::new(*b"root");
