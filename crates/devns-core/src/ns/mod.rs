//! Device namespaces.
//!
//! A [`DevNamespace`] is one isolation domain: a container identified by the
//! pid of its init process and a short tag. Drivers never keep global mutable
//! state; instead each registers a payload type with the [`DevNsRegistry`]
//! and reaches "its" state for a caller through [`NsRegistration::acquire`],
//! which creates the payload on first touch and hands back a counted
//! [`NsRef`].
//!
//! Exactly one namespace is *active* (in the foreground) at a time. Passive
//! device classes use that to drop writes from background namespaces.

mod payload;
mod registry;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::id::{NsId, Pid, RegistrationId};
use crate::sync::SpinLock;

pub use payload::{NsRef, NsRegistration};
pub use registry::DevNsRegistry;

/// Type-erased payload slot as stored in a namespace's table.
type ErasedSlot = Arc<dyn Any + Send + Sync>;

/// Four-byte namespace tag, carried verbatim in log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NsTag([u8; 4]);

impl NsTag {
    /// Creates a tag from exactly four bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Creates a tag from the first four bytes of `s`, NUL-padded.
    pub fn from_name(s: &str) -> Self {
        let mut bytes = [0u8; 4];
        for (dst, src) in bytes.iter_mut().zip(s.bytes()) {
            *dst = src;
        }
        Self(bytes)
    }

    /// Raw tag bytes.
    pub const fn as_bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl fmt::Display for NsTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0.iter().take_while(|&&b| b != 0) {
            let c = if b.is_ascii_graphic() { b as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// One device namespace.
pub struct DevNamespace {
    id: NsId,
    init_pid: Pid,
    tag: NsTag,
    active: AtomicBool,
    dead: AtomicBool,
    /// One payload per driver registration that has touched this namespace.
    slots: SpinLock<BTreeMap<RegistrationId, ErasedSlot>>,
}

impl DevNamespace {
    fn new(id: NsId, init_pid: Pid, tag: NsTag, active: bool) -> Self {
        Self {
            id,
            init_pid,
            tag,
            active: AtomicBool::new(active),
            dead: AtomicBool::new(false),
            slots: SpinLock::new(BTreeMap::new()),
        }
    }

    /// Registry-assigned identity; never reused.
    pub fn id(&self) -> NsId {
        self.id
    }

    /// Pid of the namespace's init process.
    pub fn init_pid(&self) -> Pid {
        self.init_pid
    }

    /// Namespace tag.
    pub fn tag(&self) -> NsTag {
        self.tag
    }

    /// Returns `true` if this is the foreground namespace.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns `true` once the namespace has been torn down.
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Returns `true` for the root (host) namespace.
    pub fn is_init(&self) -> bool {
        self.id == registry::ROOT_NS_ID
    }

    /// Number of driver payloads currently attached.
    pub fn payload_count(&self) -> usize {
        self.slots.lock().len()
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    fn slot(&self, reg: RegistrationId) -> Option<ErasedSlot> {
        self.slots.lock().get(&reg).cloned()
    }

    /// Marks the namespace dead and detaches every payload. The detached
    /// slots are returned so the caller drops them with no lock held.
    fn kill(&self) -> Vec<ErasedSlot> {
        let mut slots = self.slots.lock();
        self.dead.store(true, Ordering::Release);
        self.active.store(false, Ordering::Release);
        core::mem::take(&mut *slots).into_values().collect()
    }
}

impl fmt::Debug for DevNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevNamespace")
            .field("id", &self.id)
            .field("init_pid", &self.init_pid)
            .field("tag", &self.tag)
            .field("active", &self.is_active())
            .field("dead", &self.is_dead())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for DevNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.init_pid, self.tag)
    }
}
