//! Per-namespace binder state: nodes, references, processes and ids.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

use devns_core::{DevError, NsTag, Pid, Uid};

/// Recent transactions kept for the transaction log view.
const TRANSACTION_LOG_LEN: usize = 32;

/// A binder object published by its owning process.
#[derive(Debug, Clone)]
pub(super) struct Node {
    pub debug_id: u32,
    /// Proc slot of the owner; `None` once the owner has exited.
    pub owner: Option<u32>,
    pub owner_pid: Pid,
    pub ptr: u64,
    pub cookie: u64,
    /// References held on this node by processes.
    pub refs: usize,
    /// Counts held by the owner itself.
    pub local_strong: usize,
    pub local_weak: usize,
}

/// A process's handle on a node.
#[derive(Debug, Clone)]
pub(super) struct Ref {
    pub debug_id: u32,
    pub node: u32,
    pub strong: usize,
    pub weak: usize,
}

/// A queued transaction, as handed to the target process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Namespace-local transaction id.
    pub debug_id: u32,
    /// Sender's pid.
    pub from: Pid,
    /// Debug id of the target node.
    pub to_node: u32,
    /// Target node's cookie, as the owner registered it.
    pub cookie: u64,
    /// Transaction code.
    pub code: u32,
    /// Payload.
    pub data: Vec<u8>,
}

/// One completed entry in the transaction log.
#[derive(Debug, Clone, Copy)]
pub(super) struct LogEntry {
    pub debug_id: u32,
    pub from: Pid,
    pub to_pid: Pid,
    pub to_node: u32,
    pub code: u32,
    pub size: usize,
}

/// Object counters for one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinderStats {
    /// Processes that opened the device.
    pub procs_created: u64,
    /// Processes that released it.
    pub procs_deleted: u64,
    /// Nodes created.
    pub nodes_created: u64,
    /// Nodes freed.
    pub nodes_deleted: u64,
    /// References created.
    pub refs_created: u64,
    /// References freed.
    pub refs_deleted: u64,
    /// Transactions sent.
    pub transactions: u64,
}

pub(super) struct Proc {
    pub pid: Pid,
    pub nodes: BTreeMap<u64, u32>,
    /// Handle to reference; handle 0 is the context manager.
    pub refs: BTreeMap<u32, Ref>,
    pub todo: VecDeque<Transaction>,
}

pub(super) struct Inner {
    pub context_mgr_node: Option<u32>,
    pub context_mgr_uid: Uid,
    /// Last debug id handed out in this namespace.
    pub last_id: u32,
    pub next_proc: u32,
    pub nodes: BTreeMap<u32, Node>,
    pub procs: BTreeMap<u32, Proc>,
    /// Nodes whose owner exited while references remained.
    pub dead_nodes: Vec<u32>,
    pub stats: BinderStats,
    pub log: VecDeque<LogEntry>,
}

impl Inner {
    pub fn new() -> Self {
        Self {
            context_mgr_node: None,
            context_mgr_uid: Uid::INVALID,
            last_id: 0,
            next_proc: 0,
            nodes: BTreeMap::new(),
            procs: BTreeMap::new(),
            dead_nodes: Vec::new(),
            stats: BinderStats::default(),
            log: VecDeque::new(),
        }
    }

    pub fn next_debug_id(&mut self) -> u32 {
        self.last_id += 1;
        self.last_id
    }

    pub fn proc_mut(&mut self, slot: u32) -> Result<&mut Proc, DevError> {
        self.procs.get_mut(&slot).ok_or(DevError::BadFile)
    }

    pub fn add_proc(&mut self, pid: Pid) -> u32 {
        let slot = self.next_proc;
        self.next_proc += 1;
        self.procs.insert(
            slot,
            Proc {
                pid,
                nodes: BTreeMap::new(),
                refs: BTreeMap::new(),
                todo: VecDeque::new(),
            },
        );
        self.stats.procs_created += 1;
        slot
    }

    /// Returns the node `slot` owns at `ptr`, creating it if needed.
    pub fn new_node(&mut self, slot: u32, ptr: u64, cookie: u64) -> Result<u32, DevError> {
        let pid = self.proc_mut(slot)?.pid;
        if let Some(&id) = self.proc_mut(slot)?.nodes.get(&ptr) {
            return Ok(id);
        }
        let debug_id = self.next_debug_id();
        self.nodes.insert(
            debug_id,
            Node {
                debug_id,
                owner: Some(slot),
                owner_pid: pid,
                ptr,
                cookie,
                refs: 0,
                local_strong: 0,
                local_weak: 0,
            },
        );
        self.proc_mut(slot)?.nodes.insert(ptr, debug_id);
        self.stats.nodes_created += 1;
        Ok(debug_id)
    }

    /// Returns `slot`'s handle on `node`, creating the reference if needed.
    /// The context manager node gets handle 0 unless that is still taken.
    pub fn ref_for_node(&mut self, slot: u32, node: u32) -> Result<u32, DevError> {
        if !self.nodes.contains_key(&node) {
            return Err(DevError::NotFound);
        }
        if let Some((&desc, _)) = self.proc_mut(slot)?.refs.iter().find(|(_, r)| r.node == node) {
            return Ok(desc);
        }
        let is_mgr = self.context_mgr_node == Some(node);
        let debug_id = self.next_debug_id();
        let proc = self.proc_mut(slot)?;
        // Lowest free handle, starting at 0 only for the context manager.
        let mut desc = u32::from(!is_mgr);
        for &used in proc.refs.keys() {
            if used == desc {
                desc += 1;
            } else if used > desc {
                break;
            }
        }
        proc.refs.insert(
            desc,
            Ref {
                debug_id,
                node,
                strong: 0,
                weak: 0,
            },
        );
        if let Some(n) = self.nodes.get_mut(&node) {
            n.refs += 1;
        }
        self.stats.refs_created += 1;
        Ok(desc)
    }

    /// Adjusts a reference count; a reference with neither count left is
    /// deleted.
    pub fn update_ref(&mut self, slot: u32, desc: u32, strong: bool, inc: bool) -> Result<(), DevError> {
        let proc = self.proc_mut(slot)?;
        let r = proc.refs.get_mut(&desc).ok_or(DevError::NotFound)?;
        let count = if strong { &mut r.strong } else { &mut r.weak };
        if inc {
            *count += 1;
        } else {
            *count = count.checked_sub(1).ok_or(DevError::InvalidArgument)?;
        }
        if r.strong == 0 && r.weak == 0 {
            let node = r.node;
            proc.refs.remove(&desc);
            self.drop_node_ref(node);
        }
        Ok(())
    }

    fn drop_node_ref(&mut self, node: u32) {
        self.stats.refs_deleted += 1;
        let Some(n) = self.nodes.get_mut(&node) else {
            return;
        };
        n.refs = n.refs.saturating_sub(1);
        if n.refs == 0 && n.owner.is_none() {
            self.nodes.remove(&node);
            self.dead_nodes.retain(|&id| id != node);
            self.stats.nodes_deleted += 1;
        }
    }

    /// Resolves `desc` in `slot` to its node.
    pub fn resolve(&mut self, slot: u32, desc: u32) -> Result<&Node, DevError> {
        let node = self.proc_mut(slot)?.refs.get(&desc).ok_or(DevError::NotFound)?.node;
        self.nodes.get(&node).ok_or(DevError::NotFound)
    }

    /// Resolves a transaction target. Handle 0 always names the current
    /// context manager, whether or not `slot` holds a reference on it.
    pub fn target(&mut self, slot: u32, desc: u32) -> Result<&Node, DevError> {
        if desc != 0 {
            return self.resolve(slot, desc);
        }
        self.proc_mut(slot)?;
        let mgr = self.context_mgr_node.ok_or(DevError::NotFound)?;
        self.nodes.get(&mgr).ok_or(DevError::NotFound)
    }

    pub fn log_transaction(&mut self, entry: LogEntry) {
        if self.log.len() == TRANSACTION_LOG_LEN {
            self.log.pop_front();
        }
        self.log.push_back(entry);
    }

    /// Tears a process out of the namespace.
    ///
    /// Owned nodes still referenced by other processes move to the dead
    /// list; the rest are freed. The process's own references are dropped,
    /// and if it owned the context manager node, the role is vacated.
    /// Returns `(nodes moved to dead list, refs dropped)`.
    pub fn release_proc(&mut self, slot: u32) -> (usize, usize) {
        let Some(proc) = self.procs.remove(&slot) else {
            return (0, 0);
        };
        self.stats.procs_deleted += 1;

        if let Some(mgr) = self.context_mgr_node {
            if self.nodes.get(&mgr).is_some_and(|n| n.owner == Some(slot)) {
                self.context_mgr_node = None;
            }
        }

        let mut dead = 0;
        for &node in proc.nodes.values() {
            let Some(n) = self.nodes.get_mut(&node) else {
                continue;
            };
            n.owner = None;
            n.local_strong = 0;
            n.local_weak = 0;
            if n.refs == 0 {
                self.nodes.remove(&node);
                self.stats.nodes_deleted += 1;
            } else {
                self.dead_nodes.push(node);
                dead += 1;
            }
        }

        let refs = proc.refs.len();
        for r in proc.refs.values() {
            self.drop_node_ref(r.node);
        }
        (dead, refs)
    }
}

/// The binder payload of one namespace.
pub struct BinderNamespace {
    pub(super) init_pid: Pid,
    pub(super) tag: NsTag,
    pub(super) inner: devns_core::sync::SpinLock<Inner>,
}

impl BinderNamespace {
    pub(super) fn new(init_pid: Pid, tag: NsTag) -> Self {
        Self {
            init_pid,
            tag,
            inner: devns_core::sync::SpinLock::new(Inner::new()),
        }
    }

    /// Init pid of the owning namespace.
    pub fn init_pid(&self) -> Pid {
        self.init_pid
    }

    /// Tag of the owning namespace.
    pub fn tag(&self) -> NsTag {
        self.tag
    }

    /// Debug id of the context manager node, if one is registered.
    pub fn context_mgr_node(&self) -> Option<u32> {
        self.inner.lock().context_mgr_node
    }

    /// Uid that first claimed the context manager role.
    pub fn context_mgr_uid(&self) -> Uid {
        self.inner.lock().context_mgr_uid
    }

    /// Last debug id handed out.
    pub fn last_id(&self) -> u32 {
        self.inner.lock().last_id
    }

    /// Number of processes with the device open.
    pub fn proc_count(&self) -> usize {
        self.inner.lock().procs.len()
    }

    /// Debug ids of nodes whose owner exited while still referenced.
    pub fn dead_nodes(&self) -> Vec<u32> {
        self.inner.lock().dead_nodes.clone()
    }

    /// Object counters.
    pub fn stats(&self) -> BinderStats {
        self.inner.lock().stats
    }
}
