//! Type-safe identifiers for namespace-scoped kernel resources.
//!
//! These newtypes prevent accidental mixing of PIDs, user IDs, group IDs and
//! namespace identities at compile time.

use core::fmt;

/// Process (or thread) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pid(u32);

impl Pid {
    /// Creates a new `Pid`.
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Uid(u32);

impl Uid {
    /// The superuser.
    pub const ROOT: Self = Self(0);
    /// "No user" sentinel (`(uid_t)-1`).
    pub const INVALID: Self = Self(u32::MAX);

    /// Creates a new `Uid`.
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns `false` for the [`INVALID`](Self::INVALID) sentinel.
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Gid(u32);

impl Gid {
    /// Creates a new `Gid`.
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry-assigned namespace identity.
///
/// Unlike the init pid, which userspace chooses and may reuse after a
/// namespace exits, an `NsId` is never reused for the lifetime of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct NsId(u32);

impl NsId {
    /// Creates a new `NsId`.
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns{}", self.0)
    }
}

/// Identifies one driver's payload registration with a namespace registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RegistrationId(u32);

impl RegistrationId {
    /// Creates a new `RegistrationId`.
    pub const fn new(val: u32) -> Self {
        Self(val)
    }

    /// Returns the raw `u32` value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_roundtrip() {
        let pid = Pid::new(42);
        assert_eq!(pid.as_u32(), 42);
        assert_eq!(format!("{pid}"), "42");
    }

    #[test]
    fn uid_sentinel() {
        assert!(!Uid::INVALID.is_valid());
        assert!(Uid::ROOT.is_valid());
        assert!(Uid::new(1000).is_valid());
    }

    #[test]
    fn ns_id_display() {
        assert_eq!(format!("{}", NsId::new(3)), "ns3");
    }

    #[test]
    fn gid_ordering() {
        assert!(Gid::new(1) < Gid::new(1007));
    }
}
