//! Byte-accounted record ring shared by every namespace.

use alloc::collections::VecDeque;

use devns_core::Pid;

use super::LogRecord;
use super::entry::{NS_PREFIX_SIZE, V2_HEADER_SIZE};

/// Bytes a record occupies in the ring: the widest header plus its payload.
pub(super) fn stored_size(rec: &LogRecord) -> usize {
    NS_PREFIX_SIZE + V2_HEADER_SIZE + rec.payload.len()
}

/// Records in write order, each stamped with a monotonically increasing
/// sequence number. Readers remember the sequence number they resume at.
pub(super) struct Ring {
    records: VecDeque<(u64, LogRecord)>,
    capacity: usize,
    used: usize,
    next_seq: u64,
}

impl Ring {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
            used: 0,
            next_seq: 0,
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(super) fn used(&self) -> usize {
        self.used
    }

    pub(super) fn len(&self) -> usize {
        self.records.len()
    }

    /// Sequence number of the oldest record still held.
    pub(super) fn head_seq(&self) -> u64 {
        self.records.front().map_or(self.next_seq, |(seq, _)| *seq)
    }

    /// Appends `rec`, evicting the oldest records until it fits.
    ///
    /// Returns how many records were evicted.
    pub(super) fn push(&mut self, rec: LogRecord) -> usize {
        let size = stored_size(&rec);
        let mut evicted = 0;
        while self.used + size > self.capacity {
            let Some((_, old)) = self.records.pop_front() else { break };
            self.used -= stored_size(&old);
            evicted += 1;
        }
        self.used += size;
        self.records.push_back((self.next_seq, rec));
        self.next_seq += 1;
        evicted
    }

    /// Moves a cursor that fell behind the oldest record up to it.
    ///
    /// Returns `true` if the cursor had been overrun.
    pub(super) fn fix_up(&self, cursor: &mut u64) -> bool {
        let head = self.head_seq();
        if *cursor < head {
            *cursor = head;
            true
        } else {
            false
        }
    }

    /// Records at or after `cursor`, oldest first.
    pub(super) fn since(&self, cursor: u64) -> impl Iterator<Item = &(u64, LogRecord)> {
        let start = self.records.partition_point(|(seq, _)| *seq < cursor);
        self.records.range(start..)
    }

    /// Drops every record, or only those from `ns` when given.
    ///
    /// Returns how many records were dropped.
    pub(super) fn flush(&mut self, ns: Option<Pid>) -> usize {
        let before = self.records.len();
        match ns {
            None => self.records.clear(),
            Some(pid) => self.records.retain(|(_, rec)| rec.ns_init_pid != pid),
        }
        self.used = self.records.iter().map(|(_, rec)| stored_size(rec)).sum();
        before - self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use devns_core::{NsTag, Uid};

    fn rec(ns: u32, len: usize) -> LogRecord {
        LogRecord {
            ns_init_pid: Pid::new(ns),
            real_pid: Pid::new(100),
            real_tid: Pid::new(100),
            ns_tag: NsTag::default(),
            pid: Pid::new(1),
            tid: Pid::new(1),
            sec: 0,
            nsec: 0,
            euid: Uid::ROOT,
            payload: vec![0; len],
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        // Room for exactly three 64-byte records.
        let mut ring = Ring::new(3 * 64);
        assert_eq!(stored_size(&rec(1, 24)), 64);
        for _ in 0..3 {
            assert_eq!(ring.push(rec(1, 24)), 0);
        }
        assert_eq!(ring.used(), ring.capacity());
        assert_eq!(ring.push(rec(1, 24)), 1);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.head_seq(), 1);
    }

    #[test]
    fn overrun_cursor_jumps_to_head() {
        let mut ring = Ring::new(2 * 44);
        let mut cursor = ring.head_seq();
        for _ in 0..5 {
            ring.push(rec(1, 4));
        }
        assert!(ring.fix_up(&mut cursor));
        assert_eq!(cursor, 3);
        assert!(!ring.fix_up(&mut cursor));
        assert_eq!(ring.since(cursor).count(), 2);
    }

    #[test]
    fn flush_one_namespace() {
        let mut ring = Ring::new(1024);
        ring.push(rec(1, 4));
        ring.push(rec(7, 4));
        ring.push(rec(1, 4));
        assert_eq!(ring.flush(Some(Pid::new(7))), 1);
        assert_eq!(ring.used(), 2 * 44);
        let seqs: alloc::vec::Vec<u64> = ring.since(0).map(|(s, _)| *s).collect();
        assert_eq!(seqs, [0, 2]);
        assert_eq!(ring.flush(None), 2);
        assert_eq!(ring.head_seq(), 3);
    }
}
