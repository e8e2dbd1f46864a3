//! Device namespace core: the lifecycle registry, the per-namespace payload
//! accessor, and the kernel context (tasks, clocks, wake locks) the
//! namespaced drivers run against.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[cfg(all(not(test), feature = "test-util"))]
extern crate std;

pub mod config;
pub mod error;
pub mod id;
pub mod ns;
pub mod power;
pub mod sync;
pub mod task;
pub mod time;

pub use error::{DevError, NsError};
pub use id::{Gid, NsId, Pid, RegistrationId, Uid};
pub use ns::{DevNamespace, DevNsRegistry, NsRef, NsRegistration, NsTag};
pub use task::{Capabilities, Credentials, Task};
