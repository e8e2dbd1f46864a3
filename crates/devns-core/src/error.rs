//! Error types shared by the namespace registry and the drivers built on it.
//!
//! [`NsError`] is returned by the lifecycle registry; [`DevError`] is what a
//! driver entry point (open, ioctl, read, write, attribute store) reports to
//! its caller. Every [`DevError`] maps onto a Linux errno.

use core::fmt;

// ── Error numbers ────────────────────────────────────────────────────

/// `EPERM`: operation not permitted.
pub const EPERM: i32 = 1;
/// `ENOENT`: no such file or directory.
pub const ENOENT: i32 = 2;
/// `ESRCH`: no such process.
pub const ESRCH: i32 = 3;
/// `EINTR`: interrupted system call.
pub const EINTR: i32 = 4;
/// `EBADF`: bad file descriptor.
pub const EBADF: i32 = 9;
/// `EAGAIN`: try again.
pub const EAGAIN: i32 = 11;
/// `ENOMEM`: out of memory.
pub const ENOMEM: i32 = 12;
/// `EFAULT`: bad address.
pub const EFAULT: i32 = 14;
/// `EBUSY`: device or resource busy.
pub const EBUSY: i32 = 16;
/// `EEXIST`: file exists.
pub const EEXIST: i32 = 17;
/// `ENODEV`: no such device.
pub const ENODEV: i32 = 19;
/// `EINVAL`: invalid argument.
pub const EINVAL: i32 = 22;

/// Errors reported by the namespace lifecycle registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsError {
    /// A per-namespace payload could not be allocated.
    OutOfMemory,
    /// A live namespace already uses the requested init pid.
    NamespaceExists,
    /// The namespace has been torn down and accepts no new payload references.
    NamespaceDead,
    /// The root namespace cannot be destroyed.
    RootNamespace,
}

impl NsError {
    /// Returns the errno this error is reported as.
    pub const fn errno(self) -> i32 {
        match self {
            Self::OutOfMemory => ENOMEM,
            Self::NamespaceExists => EEXIST,
            Self::NamespaceDead => ESRCH,
            Self::RootNamespace => EPERM,
        }
    }
}

impl fmt::Display for NsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("namespace payload allocation failed"),
            Self::NamespaceExists => f.write_str("namespace init pid already in use"),
            Self::NamespaceDead => f.write_str("namespace has been torn down"),
            Self::RootNamespace => f.write_str("root namespace cannot be destroyed"),
        }
    }
}

impl core::error::Error for NsError {}

/// Errors returned by driver entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevError {
    /// Malformed argument from userspace (bad type, version, or filter id).
    InvalidArgument,
    /// The caller lacks the right to perform this operation.
    PermissionDenied,
    /// The device is already held open exclusively.
    Busy,
    /// A singleton role (binder context manager) is already claimed.
    AlreadySet,
    /// Namespace payload allocation failed.
    OutOfMemory,
    /// A signal arrived while the caller was blocked.
    Interrupted,
    /// Nothing is available and the operation would have to block.
    WouldBlock,
    /// The handle was not opened with the access this operation needs.
    BadFile,
    /// The named object does not exist.
    NotFound,
    /// The caller's namespace is gone.
    NoDevice,
}

impl DevError {
    /// Returns the errno this error is reported as.
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => EINVAL,
            Self::PermissionDenied => EPERM,
            Self::Busy | Self::AlreadySet => EBUSY,
            Self::OutOfMemory => ENOMEM,
            Self::Interrupted => EINTR,
            Self::WouldBlock => EAGAIN,
            Self::BadFile => EBADF,
            Self::NotFound => ENOENT,
            Self::NoDevice => ENODEV,
        }
    }
}

impl fmt::Display for DevError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::PermissionDenied => f.write_str("operation not permitted"),
            Self::Busy => f.write_str("device or resource busy"),
            Self::AlreadySet => f.write_str("already set"),
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::WouldBlock => f.write_str("operation would block"),
            Self::BadFile => f.write_str("bad file handle"),
            Self::NotFound => f.write_str("not found"),
            Self::NoDevice => f.write_str("no such device"),
        }
    }
}

impl core::error::Error for DevError {}

impl From<NsError> for DevError {
    fn from(err: NsError) -> Self {
        match err {
            NsError::OutOfMemory => Self::OutOfMemory,
            NsError::NamespaceExists => Self::AlreadySet,
            NsError::NamespaceDead => Self::NoDevice,
            NsError::RootNamespace => Self::PermissionDenied,
        }
    }
}
