//! Typed per-namespace payloads and the acquire/release accessor.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Deref;

use super::{DevNamespace, DevNsRegistry, ErasedSlot};
use crate::error::NsError;
use crate::id::RegistrationId;
use crate::task::Task;

type CreateFn<T> = dyn Fn(&Arc<DevNamespace>) -> Result<T, NsError> + Send + Sync;
type DestroyFn<T> = dyn Fn(&T) + Send + Sync;

/// A constructed payload together with its destructor.
///
/// The namespace's table holds one strong reference and every [`NsRef`]
/// another; the destroy callback runs when the last one is dropped.
struct NsSlot<T: Send + Sync + 'static> {
    value: T,
    name: &'static str,
    destroy: Arc<DestroyFn<T>>,
}

impl<T: Send + Sync + 'static> Drop for NsSlot<T> {
    fn drop(&mut self) {
        log::debug!("devns: destroying '{}' payload", self.name);
        (self.destroy)(&self.value);
    }
}

/// A driver's handle on its per-namespace payload type.
pub struct NsRegistration<T: Send + Sync + 'static> {
    id: RegistrationId,
    name: &'static str,
    registry: Arc<DevNsRegistry>,
    create: Box<CreateFn<T>>,
    destroy: Arc<DestroyFn<T>>,
}

impl<T: Send + Sync + 'static> NsRegistration<T> {
    pub(super) fn new<C, D>(
        id: RegistrationId,
        name: &'static str,
        registry: Arc<DevNsRegistry>,
        create: C,
        destroy: D,
    ) -> Self
    where
        C: Fn(&Arc<DevNamespace>) -> Result<T, NsError> + Send + Sync + 'static,
        D: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            id,
            name,
            registry,
            create: Box::new(create),
            destroy: Arc::new(destroy),
        }
    }

    /// Registration identity.
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Name given at registration.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The registry this payload type is registered with.
    pub fn registry(&self) -> &Arc<DevNsRegistry> {
        &self.registry
    }

    /// Returns a counted reference to `ns`'s payload, creating it on first
    /// use.
    ///
    /// # Errors
    ///
    /// [`NsError::NamespaceDead`] if `ns` has been torn down, or whatever the
    /// create callback returns (typically [`NsError::OutOfMemory`]).
    pub fn acquire(&self, ns: &Arc<DevNamespace>) -> Result<NsRef<T>, NsError> {
        if ns.is_dead() {
            return Err(NsError::NamespaceDead);
        }
        if let Some(slot) = self.lookup(ns) {
            return Ok(NsRef { slot, ns: ns.clone() });
        }

        // Build outside every lock: create callbacks allocate wake locks and
        // timers.
        if self.registry.take_create_failure() {
            log::warn!("devns: '{}' payload creation failed for ns {}", self.name, ns.init_pid());
            return Err(NsError::OutOfMemory);
        }
        let value = (self.create)(ns).inspect_err(|err| {
            log::warn!("devns: '{}' payload creation failed for ns {}: {err}", self.name, ns.init_pid());
        })?;
        let fresh = Arc::new(NsSlot {
            value,
            name: self.name,
            destroy: self.destroy.clone(),
        });

        let mut slots = ns.slots.lock();
        if ns.is_dead() {
            drop(slots);
            drop(fresh);
            return Err(NsError::NamespaceDead);
        }
        if let Some(existing) = slots.get(&self.id).cloned() {
            // Lost a creation race; ours is dropped after the lock.
            drop(slots);
            drop(fresh);
            let slot = downcast(existing).ok_or(NsError::NamespaceDead)?;
            return Ok(NsRef { slot, ns: ns.clone() });
        }
        let erased: ErasedSlot = fresh.clone();
        slots.insert(self.id, erased);
        drop(slots);
        log::debug!("devns: created '{}' payload for ns {}", self.name, ns.init_pid());
        Ok(NsRef { slot: fresh, ns: ns.clone() })
    }

    /// [`acquire`](Self::acquire) for the namespace `task` belongs to.
    ///
    /// # Errors
    ///
    /// As for [`acquire`](Self::acquire).
    pub fn acquire_current(&self, task: &Task) -> Result<NsRef<T>, NsError> {
        self.acquire(task.ns())
    }

    /// Returns `ns`'s payload only if it already exists.
    pub fn get(&self, ns: &Arc<DevNamespace>) -> Option<NsRef<T>> {
        if ns.is_dead() {
            return None;
        }
        self.lookup(ns).map(|slot| NsRef { slot, ns: ns.clone() })
    }

    /// Visits every live namespace that holds a payload of this type.
    ///
    /// The namespace list is snapshotted first, and each payload is pinned
    /// by a reference for the duration of its visit; no registry or table
    /// lock is held while `visit` runs.
    pub fn for_each_live(&self, mut visit: impl FnMut(&Arc<DevNamespace>, &T)) {
        let targets: Vec<NsRef<T>> = self
            .registry
            .namespaces()
            .iter()
            .filter_map(|ns| self.get(ns))
            .collect();
        for r in &targets {
            visit(r.ns(), &**r);
        }
    }

    fn lookup(&self, ns: &DevNamespace) -> Option<Arc<NsSlot<T>>> {
        ns.slot(self.id).and_then(downcast)
    }
}

fn downcast<T: Send + Sync + 'static>(slot: ErasedSlot) -> Option<Arc<NsSlot<T>>> {
    slot.downcast::<NsSlot<T>>().ok()
}

/// Counted reference to one namespace's payload.
///
/// Holding an `NsRef` keeps the payload alive across namespace teardown;
/// dropping it (or calling [`release`](Self::release)) gives the reference
/// back.
pub struct NsRef<T: Send + Sync + 'static> {
    slot: Arc<NsSlot<T>>,
    ns: Arc<DevNamespace>,
}

impl<T: Send + Sync + 'static> NsRef<T> {
    /// The namespace the payload belongs to.
    pub fn ns(&self) -> &Arc<DevNamespace> {
        &self.ns
    }

    /// Gives the reference back. Equivalent to dropping it.
    pub fn release(self) {}

    /// Outstanding references to this payload, the namespace's own included
    /// while it is live.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.slot)
    }

    /// Returns `true` if both refer to the same payload.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.slot, &b.slot)
    }
}

impl<T: Send + Sync + 'static> Clone for NsRef<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            ns: self.ns.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Deref for NsRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.slot.value
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for NsRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NsRef")
            .field("payload", &self.slot.name)
            .field("ns", &self.ns.init_pid())
            .field("refs", &self.ref_count())
            .finish()
    }
}
