//! Debug views (`state`, `stats`, `transactions`, `transaction_log`,
//! `proc/<pid>`), one section per live namespace.

use alloc::string::String;
use core::fmt::{self, Write};

use devns_core::Pid;

use super::BinderDevice;
use super::ns::{BinderNamespace, Inner, Node, Proc};

fn write_heading(out: &mut String, ns: &BinderNamespace) -> fmt::Result {
    writeln!(out, "namespace {} ({})", ns.init_pid(), ns.tag())
}

fn write_node(out: &mut String, node: &Node) -> fmt::Result {
    write!(
        out,
        "  node {}: u{:016x} c{:016x} refs {}",
        node.debug_id, node.ptr, node.cookie, node.refs
    )?;
    if node.owner.is_some() {
        write!(out, " hs {} hw {}", node.local_strong, node.local_weak)?;
    }
    writeln!(out)
}

fn write_proc(out: &mut String, inner: &Inner, proc: &Proc) -> fmt::Result {
    writeln!(out, "proc {}", proc.pid)?;
    for node in proc.nodes.values().filter_map(|id| inner.nodes.get(id)) {
        write_node(out, node)?;
    }
    for (desc, r) in &proc.refs {
        let dead = inner.nodes.get(&r.node).is_none_or(|n| n.owner.is_none());
        writeln!(
            out,
            "  ref {}: desc {desc} {}node {} s {} w {}",
            r.debug_id,
            if dead { "dead " } else { "" },
            r.node,
            r.strong,
            r.weak
        )?;
    }
    Ok(())
}

fn write_pending(out: &mut String, proc: &Proc) -> fmt::Result {
    writeln!(out, "proc {}", proc.pid)?;
    for t in &proc.todo {
        writeln!(
            out,
            "  pending transaction {}: from {} to node {} code {} size {}",
            t.debug_id,
            t.from,
            t.to_node,
            t.code,
            t.data.len()
        )?;
    }
    Ok(())
}

impl BinderDevice {
    fn render(&self, title: &str, mut section: impl FnMut(&mut String, &Inner) -> fmt::Result) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "binder {title}:");
        self.namespaces.for_each_live(|_, state| {
            let inner = state.inner.lock();
            let _ = write_heading(&mut out, state).and_then(|()| section(&mut out, &*inner));
        });
        out
    }

    /// Every node, reference and dead node, per namespace.
    pub fn state(&self) -> String {
        self.render("state", |out, inner| {
            if !inner.dead_nodes.is_empty() {
                writeln!(out, "dead nodes:")?;
                for node in inner.dead_nodes.iter().filter_map(|id| inner.nodes.get(id)) {
                    write_node(out, node)?;
                }
            }
            for proc in inner.procs.values() {
                write_proc(out, inner, proc)?;
            }
            Ok(())
        })
    }

    /// Object counters, per namespace.
    pub fn stats(&self) -> String {
        self.render("stats", |out, inner| {
            let s = inner.stats;
            writeln!(out, "  procs: active {} total {}", s.procs_created - s.procs_deleted, s.procs_created)?;
            writeln!(out, "  nodes: active {} total {}", s.nodes_created - s.nodes_deleted, s.nodes_created)?;
            writeln!(out, "  refs: active {} total {}", s.refs_created - s.refs_deleted, s.refs_created)?;
            writeln!(out, "  transactions: {}", s.transactions)
        })
    }

    /// Undelivered transactions, per namespace and process.
    pub fn transactions(&self) -> String {
        self.render("transactions", |out, inner| {
            for proc in inner.procs.values().filter(|p| !p.todo.is_empty()) {
                write_pending(out, proc)?;
            }
            Ok(())
        })
    }

    /// The most recent transactions sent in each namespace.
    pub fn transaction_log(&self) -> String {
        self.render("transaction log", |out, inner| {
            for e in &inner.log {
                writeln!(
                    out,
                    "{}: from {} to {} node {} code {} size {}",
                    e.debug_id, e.from, e.to_pid, e.to_node, e.code, e.size
                )?;
            }
            Ok(())
        })
    }

    /// State of every process with global pid `pid`, or `None` if no
    /// namespace has one.
    pub fn proc_state(&self, pid: Pid) -> Option<String> {
        let mut out = String::new();
        let mut found = false;
        let _ = writeln!(out, "binder proc state:");
        self.namespaces.for_each_live(|_, state| {
            let inner = state.inner.lock();
            for proc in inner.procs.values().filter(|p| p.pid == pid) {
                found = true;
                let _ = write_heading(&mut out, state).and_then(|()| write_proc(&mut out, &inner, proc));
            }
        });
        found.then_some(out)
    }
}

#[cfg(test)]
mod tests {
    use devns_core::task::Task;
    use devns_core::{Credentials, DevNsRegistry, NsTag, Pid};

    use super::super::BinderDevice;

    #[test]
    fn state_has_one_section_per_namespace() {
        let registry = DevNsRegistry::new();
        let dev = BinderDevice::new(&registry);
        let ns = registry.create_namespace(Pid::new(500), NsTag::from_name("work")).unwrap();
        let _untouched = registry.create_namespace(Pid::new(600), NsTag::from_name("idle")).unwrap();

        let t_root = Task::new(10, registry.root(), Credentials::root());
        let t_ns = Task::new(501, &ns, Credentials::root());
        let f_root = dev.open(&t_root).unwrap();
        let f_ns = dev.open(&t_ns).unwrap();
        f_root.set_context_mgr(&t_root).unwrap();
        f_ns.new_node(0x1000, 0x2000).unwrap();

        let state = dev.state();
        assert!(state.starts_with("binder state:\n"));
        assert!(state.contains("namespace 1 (root)\nproc 10\n  node 1: u0000000000000000"));
        assert!(state.contains("namespace 500 (work)\nproc 501\n  node 1: u0000000000001000 c0000000000002000"));
        assert!(!state.contains("idle"));
    }

    #[test]
    fn stats_and_transactions() {
        let registry = DevNsRegistry::new();
        let dev = BinderDevice::new(&registry);
        let sm = Task::new(10, registry.root(), Credentials::root());
        let client = Task::new(11, registry.root(), Credentials::root());
        let f_sm = dev.open(&sm).unwrap();
        let f_client = dev.open(&client).unwrap();
        f_sm.set_context_mgr(&sm).unwrap();
        f_client.context_mgr_ref().unwrap();
        f_client.transact(0, 3, b"abc").unwrap();

        let stats = dev.stats();
        assert!(stats.contains("  procs: active 2 total 2\n"));
        assert!(stats.contains("  transactions: 1\n"));

        let pending = dev.transactions();
        assert!(pending.contains("proc 10\n  pending transaction 3: from 11 to node 1 code 3 size 3\n"));

        assert!(dev.transaction_log().contains("3: from 11 to 10 node 1 code 3 size 3\n"));

        f_sm.take_work().unwrap();
        assert!(!dev.transactions().contains("pending"));
    }

    #[test]
    fn proc_state_by_pid() {
        let registry = DevNsRegistry::new();
        let dev = BinderDevice::new(&registry);
        let task = Task::new(10, registry.root(), Credentials::root());
        let _file = dev.open(&task).unwrap();
        assert!(dev.proc_state(Pid::new(10)).unwrap().contains("namespace 1 (root)\nproc 10\n"));
        assert!(dev.proc_state(Pid::new(99)).is_none());
    }
}
