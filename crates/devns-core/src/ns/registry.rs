//! The namespace lifecycle registry.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::{DevNamespace, NsRegistration, NsTag};
use crate::config::{ROOT_INIT_PID, ROOT_TAG};
use crate::error::NsError;
use crate::id::{NsId, Pid, RegistrationId};
use crate::sync::SpinLock;

/// Identity of the namespace created by [`DevNsRegistry::new`].
pub(super) const ROOT_NS_ID: NsId = NsId::new(0);

struct RegistryInner {
    /// Live namespaces, root included.
    namespaces: BTreeMap<NsId, Arc<DevNamespace>>,
    next_ns: u32,
    next_registration: u32,
}

/// Tracks every live device namespace and the driver payload registrations.
///
/// The registry never holds a namespace's payload lock while holding its
/// own, and hands out snapshots (`Vec<Arc<DevNamespace>>`) for iteration so
/// visitors run with no registry lock held.
pub struct DevNsRegistry {
    inner: SpinLock<RegistryInner>,
    root: Arc<DevNamespace>,
    /// Pending injected payload-construction failures.
    create_failures: AtomicUsize,
}

impl DevNsRegistry {
    /// Creates a registry holding only the root namespace, which starts
    /// active.
    pub fn new() -> Arc<Self> {
        let root = Arc::new(DevNamespace::new(ROOT_NS_ID, ROOT_INIT_PID, ROOT_TAG, true));
        let mut namespaces = BTreeMap::new();
        namespaces.insert(ROOT_NS_ID, root.clone());
        Arc::new(Self {
            inner: SpinLock::new(RegistryInner {
                namespaces,
                next_ns: ROOT_NS_ID.as_u32() + 1,
                next_registration: 0,
            }),
            root,
            create_failures: AtomicUsize::new(0),
        })
    }

    /// The root (host) namespace.
    pub fn root(&self) -> &Arc<DevNamespace> {
        &self.root
    }

    /// Creates an inactive namespace whose init process is `init_pid`.
    ///
    /// # Errors
    ///
    /// [`NsError::NamespaceExists`] if a live namespace already uses
    /// `init_pid`.
    pub fn create_namespace(&self, init_pid: Pid, tag: NsTag) -> Result<Arc<DevNamespace>, NsError> {
        let mut inner = self.inner.lock();
        if inner.namespaces.values().any(|ns| ns.init_pid() == init_pid) {
            log::warn!("devns: init pid {init_pid} already owns a namespace");
            return Err(NsError::NamespaceExists);
        }
        let id = NsId::new(inner.next_ns);
        inner.next_ns += 1;
        let ns = Arc::new(DevNamespace::new(id, init_pid, tag, false));
        inner.namespaces.insert(id, ns.clone());
        log::info!("devns: created namespace {id} init pid {init_pid} tag '{tag}'");
        Ok(ns)
    }

    /// Tears `ns` down.
    ///
    /// The namespace leaves the live set at once and stops handing out new
    /// payload references. Each payload is destroyed when its last
    /// outstanding [`NsRef`](super::NsRef) goes away, which is immediately
    /// if none are held. If `ns` was the foreground namespace, the root
    /// namespace becomes active.
    ///
    /// # Errors
    ///
    /// [`NsError::RootNamespace`] for the root namespace,
    /// [`NsError::NamespaceDead`] if `ns` was already destroyed.
    pub fn destroy_namespace(&self, ns: &Arc<DevNamespace>) -> Result<(), NsError> {
        if ns.is_init() {
            return Err(NsError::RootNamespace);
        }
        let was_active = {
            let mut inner = self.inner.lock();
            if inner.namespaces.remove(&ns.id()).is_none() {
                return Err(NsError::NamespaceDead);
            }
            let was_active = ns.is_active();
            if was_active {
                self.root.set_active(true);
            }
            was_active
        };
        let detached = ns.kill();
        log::info!(
            "devns: destroyed namespace {} init pid {} ({} payloads detached)",
            ns.id(),
            ns.init_pid(),
            detached.len()
        );
        if was_active {
            log::info!("devns: root namespace is active again");
        }
        // Payload destroy callbacks run here for slots nobody else references.
        drop(detached);
        Ok(())
    }

    /// Brings `ns` to the foreground; every other namespace becomes inactive.
    ///
    /// # Errors
    ///
    /// [`NsError::NamespaceDead`] if `ns` has been destroyed.
    pub fn activate(&self, ns: &Arc<DevNamespace>) -> Result<(), NsError> {
        let inner = self.inner.lock();
        if !inner.namespaces.contains_key(&ns.id()) {
            return Err(NsError::NamespaceDead);
        }
        for other in inner.namespaces.values() {
            other.set_active(Arc::ptr_eq(other, ns));
        }
        log::debug!("devns: namespace {} is now active", ns.init_pid());
        Ok(())
    }

    /// The foreground namespace.
    pub fn active(&self) -> Arc<DevNamespace> {
        let inner = self.inner.lock();
        inner
            .namespaces
            .values()
            .find(|ns| ns.is_active())
            .cloned()
            .unwrap_or_else(|| self.root.clone())
    }

    /// Snapshot of every live namespace, in creation order.
    pub fn namespaces(&self) -> Vec<Arc<DevNamespace>> {
        self.inner.lock().namespaces.values().cloned().collect()
    }

    /// Finds the live namespace whose init process is `init_pid`.
    pub fn lookup_init_pid(&self, init_pid: Pid) -> Option<Arc<DevNamespace>> {
        self.inner
            .lock()
            .namespaces
            .values()
            .find(|ns| ns.init_pid() == init_pid)
            .cloned()
    }

    /// Returns `true` if `ns` is the foreground namespace.
    pub fn is_active(&self, ns: &DevNamespace) -> bool {
        ns.is_active()
    }

    /// Returns `true` if `ns` is the root namespace.
    pub fn is_init_namespace(&self, ns: &DevNamespace) -> bool {
        ns.is_init()
    }

    /// Init pid of `ns`.
    pub fn init_pid(&self, ns: &DevNamespace) -> Pid {
        ns.init_pid()
    }

    /// Registers a per-namespace payload type.
    ///
    /// `create` builds the payload the first time a namespace is touched
    /// through the returned registration; `destroy` runs once, when the last
    /// reference to that payload is dropped after namespace teardown.
    pub fn register<T, C, D>(self: &Arc<Self>, name: &'static str, create: C, destroy: D) -> NsRegistration<T>
    where
        T: Send + Sync + 'static,
        C: Fn(&Arc<DevNamespace>) -> Result<T, NsError> + Send + Sync + 'static,
        D: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = self.inner.lock();
            let id = RegistrationId::new(inner.next_registration);
            inner.next_registration += 1;
            id
        };
        log::debug!("devns: registered '{name}' as payload {}", id.as_u32());
        NsRegistration::new(id, name, self.clone(), create, destroy)
    }

    /// Makes the next `count` payload constructions fail with
    /// [`NsError::OutOfMemory`].
    pub fn inject_create_failures(&self, count: usize) {
        self.create_failures.store(count, Ordering::SeqCst);
    }

    /// Consumes one injected failure, if any is pending.
    pub(super) fn take_create_failure(&self) -> bool {
        self.create_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_exists_and_is_active() {
        let reg = DevNsRegistry::new();
        let root = reg.root();
        assert!(root.is_init());
        assert!(reg.is_init_namespace(root));
        assert!(reg.is_active(root));
        assert_eq!(reg.init_pid(root), ROOT_INIT_PID);
        assert_eq!(reg.namespaces().len(), 1);
    }

    #[test]
    fn duplicate_init_pid_rejected() {
        let reg = DevNsRegistry::new();
        reg.create_namespace(Pid::new(100), NsTag::from_name("a")).unwrap();
        assert_eq!(
            reg.create_namespace(Pid::new(100), NsTag::from_name("b")).unwrap_err(),
            NsError::NamespaceExists
        );
        assert_eq!(
            reg.create_namespace(ROOT_INIT_PID, NsTag::from_name("c")).unwrap_err(),
            NsError::NamespaceExists
        );
    }

    #[test]
    fn init_pid_reusable_after_destroy() {
        let reg = DevNsRegistry::new();
        let ns = reg.create_namespace(Pid::new(100), NsTag::from_name("a")).unwrap();
        reg.destroy_namespace(&ns).unwrap();
        let again = reg.create_namespace(Pid::new(100), NsTag::from_name("a")).unwrap();
        assert_ne!(ns.id(), again.id());
    }

    #[test]
    fn activate_is_exclusive() {
        let reg = DevNsRegistry::new();
        let a = reg.create_namespace(Pid::new(100), NsTag::from_name("a")).unwrap();
        let b = reg.create_namespace(Pid::new(200), NsTag::from_name("b")).unwrap();
        assert!(!a.is_active());

        reg.activate(&a).unwrap();
        assert!(a.is_active());
        assert!(!b.is_active());
        assert!(!reg.root().is_active());
        assert_eq!(reg.active().id(), a.id());

        reg.activate(&b).unwrap();
        assert!(!a.is_active());
        assert!(b.is_active());
    }

    #[test]
    fn destroying_active_namespace_reactivates_root() {
        let reg = DevNsRegistry::new();
        let a = reg.create_namespace(Pid::new(100), NsTag::from_name("a")).unwrap();
        reg.activate(&a).unwrap();
        reg.destroy_namespace(&a).unwrap();
        assert!(a.is_dead());
        assert!(!a.is_active());
        assert!(reg.root().is_active());
        assert_eq!(reg.activate(&a), Err(NsError::NamespaceDead));
    }

    #[test]
    fn root_cannot_be_destroyed() {
        let reg = DevNsRegistry::new();
        let root = reg.root().clone();
        assert_eq!(reg.destroy_namespace(&root), Err(NsError::RootNamespace));
        assert!(!root.is_dead());
    }

    #[test]
    fn double_destroy_reports_dead() {
        let reg = DevNsRegistry::new();
        let a = reg.create_namespace(Pid::new(100), NsTag::from_name("a")).unwrap();
        reg.destroy_namespace(&a).unwrap();
        assert_eq!(reg.destroy_namespace(&a), Err(NsError::NamespaceDead));
    }

    #[test]
    fn lookup_by_init_pid() {
        let reg = DevNsRegistry::new();
        let a = reg.create_namespace(Pid::new(100), NsTag::from_name("a")).unwrap();
        assert_eq!(reg.lookup_init_pid(Pid::new(100)).unwrap().id(), a.id());
        assert!(reg.lookup_init_pid(Pid::new(999)).is_none());
        reg.destroy_namespace(&a).unwrap();
        assert!(reg.lookup_init_pid(Pid::new(100)).is_none());
    }

    #[test]
    fn injected_failures_count_down() {
        let reg = DevNsRegistry::new();
        reg.inject_create_failures(2);
        assert!(reg.take_create_failure());
        assert!(reg.take_create_failure());
        assert!(!reg.take_create_failure());
    }
}
