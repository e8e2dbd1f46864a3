//! Binder IPC with per-namespace contexts.
//!
//! A process joins the namespace it opened the device in for as long as it
//! keeps the handle. Everything binder used to keep globally is in that
//! namespace's [`BinderNamespace`]: the context manager node and the uid
//! that claimed it, the debug-id counter (so node, reference and
//! transaction ids are only unique within a namespace), the open
//! processes, and the dead-node list. Handle 0 therefore reaches a
//! different context manager in every namespace.

mod debug;
mod ns;

use alloc::sync::Arc;
use alloc::vec::Vec;

use devns_core::task::Task;
use devns_core::{DevError, DevNamespace, DevNsRegistry, NsRef, NsRegistration, Pid, Uid};

use crate::config::BINDER_CURRENT_PROTOCOL_VERSION;

pub use ns::{BinderNamespace, BinderStats, Transaction};

/// The binder device.
pub struct BinderDevice {
    namespaces: NsRegistration<BinderNamespace>,
}

impl BinderDevice {
    /// Registers the binder payload with `registry`.
    pub fn new(registry: &Arc<DevNsRegistry>) -> Arc<Self> {
        let namespaces = registry.register(
            "binder",
            |ns| Ok(BinderNamespace::new(ns.init_pid(), ns.tag())),
            |state: &BinderNamespace| {
                let inner = state.inner.lock();
                if !inner.procs.is_empty() || !inner.dead_nodes.is_empty() {
                    log::warn!(
                        "binder: namespace {} freed with {} procs and {} dead nodes",
                        state.init_pid,
                        inner.procs.len(),
                        inner.dead_nodes.len()
                    );
                }
            },
        );
        Arc::new(Self { namespaces })
    }

    /// Opens the device: `task`'s process joins its namespace's binder
    /// context.
    ///
    /// # Errors
    ///
    /// [`DevError::OutOfMemory`] if the namespace's binder state cannot be
    /// allocated, [`DevError::NoDevice`] if the namespace is gone.
    pub fn open(self: &Arc<Self>, task: &Task) -> Result<BinderFile, DevError> {
        let ns = self.namespaces.acquire_current(task)?;
        let slot = ns.inner.lock().add_proc(task.pid());
        log::debug!("binder: open pid {} in namespace {}", task.pid(), ns.init_pid);
        Ok(BinderFile {
            ns,
            slot,
            pid: task.pid(),
        })
    }

    /// `ns`'s binder state, if the namespace has touched the device.
    pub fn namespace(&self, ns: &Arc<DevNamespace>) -> Option<NsRef<BinderNamespace>> {
        self.namespaces.get(ns)
    }

    /// Uid bound to the context manager role, for every namespace where the
    /// role has been claimed.
    pub fn context_managers(&self) -> Vec<(Pid, Uid)> {
        let mut out = Vec::new();
        self.namespaces.for_each_live(|ns, state| {
            let uid = state.context_mgr_uid();
            if uid.is_valid() {
                out.push((ns.init_pid(), uid));
            }
        });
        out
    }
}

/// A process's open binder handle.
pub struct BinderFile {
    ns: NsRef<BinderNamespace>,
    slot: u32,
    pid: Pid,
}

impl BinderFile {
    /// Namespace the process belongs to.
    pub fn ns(&self) -> &Arc<DevNamespace> {
        self.ns.ns()
    }

    /// The namespace's binder state.
    pub fn context(&self) -> &BinderNamespace {
        &self.ns
    }

    /// `BINDER_VERSION`.
    pub fn version(&self) -> i32 {
        BINDER_CURRENT_PROTOCOL_VERSION
    }

    /// `BINDER_SET_CONTEXT_MGR`: claims the namespace's context manager role.
    ///
    /// The first claim records the caller's euid; from then on only that
    /// user may hold the role in this namespace. A claim while the role is
    /// held succeeds only as a repeat by the holding process.
    ///
    /// # Errors
    ///
    /// [`DevError::PermissionDenied`] if another euid claimed the role,
    /// [`DevError::AlreadySet`] if another process holds it.
    pub fn set_context_mgr(&self, task: &Task) -> Result<(), DevError> {
        let euid = task.euid();
        let mut inner = self.ns.inner.lock();

        if inner.context_mgr_uid.is_valid() && inner.context_mgr_uid != euid {
            log::warn!(
                "binder: context manager claim by uid {euid} denied in namespace {} (held by uid {})",
                self.ns.init_pid,
                inner.context_mgr_uid
            );
            return Err(DevError::PermissionDenied);
        }
        if let Some(node) = inner.context_mgr_node {
            if inner.nodes.get(&node).is_some_and(|n| n.owner == Some(self.slot)) {
                return Ok(());
            }
            log::warn!("binder: context manager already set in namespace {}", self.ns.init_pid);
            return Err(DevError::AlreadySet);
        }

        let node = inner.new_node(self.slot, 0, 0)?;
        if let Some(n) = inner.nodes.get_mut(&node) {
            n.local_strong = 1;
            n.local_weak = 1;
        }
        inner.context_mgr_node = Some(node);
        if !inner.context_mgr_uid.is_valid() {
            inner.context_mgr_uid = euid;
        }
        log::info!(
            "binder: pid {} is context manager of namespace {} (node {node})",
            self.pid,
            self.ns.init_pid
        );
        Ok(())
    }

    /// Publishes a local object at `ptr` and returns its node's debug id.
    ///
    /// # Errors
    ///
    /// [`DevError::BadFile`] if the handle has been released.
    pub fn new_node(&self, ptr: u64, cookie: u64) -> Result<u32, DevError> {
        self.ns.inner.lock().new_node(self.slot, ptr, cookie)
    }

    /// Returns this process's handle on node `node` (by debug id), taking a
    /// strong or weak count on it.
    ///
    /// # Errors
    ///
    /// [`DevError::NotFound`] if no such node exists in this namespace.
    pub fn get_ref_for_node(&self, node: u32, strong: bool) -> Result<u32, DevError> {
        let mut inner = self.ns.inner.lock();
        let desc = inner.ref_for_node(self.slot, node)?;
        inner.update_ref(self.slot, desc, strong, true)?;
        Ok(desc)
    }

    /// Resolves handle 0 to this namespace's context manager, taking a
    /// strong count.
    ///
    /// # Errors
    ///
    /// [`DevError::NotFound`] if the namespace has no context manager.
    pub fn context_mgr_ref(&self) -> Result<u32, DevError> {
        let node = self.ns.inner.lock().context_mgr_node.ok_or(DevError::NotFound)?;
        self.get_ref_for_node(node, true)
    }

    /// `BC_ACQUIRE` / `BC_INCREFS` on handle `desc`.
    ///
    /// # Errors
    ///
    /// [`DevError::NotFound`] for an unknown handle.
    pub fn inc_ref(&self, desc: u32, strong: bool) -> Result<(), DevError> {
        self.ns.inner.lock().update_ref(self.slot, desc, strong, true)
    }

    /// `BC_RELEASE` / `BC_DECREFS` on handle `desc`.
    ///
    /// # Errors
    ///
    /// [`DevError::NotFound`] for an unknown handle,
    /// [`DevError::InvalidArgument`] if the count is already zero.
    pub fn dec_ref(&self, desc: u32, strong: bool) -> Result<(), DevError> {
        self.ns.inner.lock().update_ref(self.slot, desc, strong, false)
    }

    /// `BC_TRANSACTION` to handle `desc`. Returns the transaction's
    /// namespace-local debug id. Handle 0 reaches the namespace's context
    /// manager directly.
    ///
    /// # Errors
    ///
    /// [`DevError::NotFound`] for an unknown handle or, for handle 0, a
    /// namespace without a context manager,
    /// [`DevError::NoDevice`] if the target's owner has exited.
    pub fn transact(&self, desc: u32, code: u32, data: &[u8]) -> Result<u32, DevError> {
        let mut inner = self.ns.inner.lock();
        let (to_node, cookie, owner, to_pid) = {
            let node = inner.target(self.slot, desc)?;
            (node.debug_id, node.cookie, node.owner, node.owner_pid)
        };
        let owner = owner.ok_or(DevError::NoDevice)?;
        let debug_id = inner.next_debug_id();
        inner.proc_mut(owner)?.todo.push_back(Transaction {
            debug_id,
            from: self.pid,
            to_node,
            cookie,
            code,
            data: data.to_vec(),
        });
        inner.stats.transactions += 1;
        inner.log_transaction(ns::LogEntry {
            debug_id,
            from: self.pid,
            to_pid,
            to_node,
            code,
            size: data.len(),
        });
        Ok(debug_id)
    }

    /// Dequeues the next transaction addressed to this process.
    pub fn take_work(&self) -> Option<Transaction> {
        self.ns.inner.lock().proc_mut(self.slot).ok()?.todo.pop_front()
    }

    /// Number of transactions waiting for this process.
    pub fn pending_work(&self) -> usize {
        self.ns
            .inner
            .lock()
            .procs
            .get(&self.slot)
            .map_or(0, |p| p.todo.len())
    }

    /// Closes the handle. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Drop for BinderFile {
    fn drop(&mut self) {
        let (dead, refs) = self.ns.inner.lock().release_proc(self.slot);
        log::debug!(
            "binder: release pid {} in namespace {}: {dead} nodes now dead, {refs} refs dropped",
            self.pid,
            self.ns.init_pid
        );
    }
}

impl core::fmt::Debug for BinderFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BinderFile")
            .field("pid", &self.pid)
            .field("ns", &self.ns.init_pid)
            .finish_non_exhaustive()
    }
}
