//! Device drivers whose state is partitioned per device namespace.
//!
//! - [`alarm`]: the alarm timer device. Each namespace gets its own alarms,
//!   wait queue and wake lock; setting the RTC notifies every namespace.
//! - [`binder`]: binder IPC. Context manager, debug ids and node lists are
//!   namespace-local; debug views cover every namespace.
//! - [`logger`]: the kernel log buffers. Storage is shared, but every record
//!   names its writer's namespace and readers are filtered by it.
//! - [`backlight`]: backlight and LCD class devices, which ignore stores from
//!   background namespaces.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod alarm;
pub mod backlight;
pub mod binder;
pub mod config;
pub mod file;
pub mod logger;

pub use file::OpenFlags;
