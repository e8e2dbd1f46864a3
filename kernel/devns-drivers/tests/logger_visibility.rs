//! Log reader filtering and header shapes, end to end.

use std::sync::Arc;

use devns_core::task::Task;
use devns_core::time::{SystemClock, Timespec};
use devns_core::{Credentials, DevError, DevNamespace, DevNsRegistry, NsTag, Pid};
use devns_drivers::OpenFlags;
use devns_drivers::config::AID_LOG;
use devns_drivers::logger::entry::{EntryHeader, HeaderAbi, LOGGER_NS_VERSION_FLAG};
use devns_drivers::logger::{LoggerCmd, LoggerDevices, LoggerFile};
use proptest::prelude::*;
use proptest::sample::select;

struct Setup {
    registry: Arc<DevNsRegistry>,
    clock: Arc<SystemClock>,
    logs: LoggerDevices,
    namespaces: [Arc<DevNamespace>; 3],
}

fn setup() -> Setup {
    let registry = DevNsRegistry::new();
    let clock = Arc::new(SystemClock::new());
    let logs = LoggerDevices::with_size(&clock, 256 * 1024);
    let a = registry.create_namespace(Pid::new(500), NsTag::from_name("a")).unwrap();
    let b = registry.create_namespace(Pid::new(600), NsTag::from_name("b")).unwrap();
    let namespaces = [registry.root().clone(), a, b];
    Setup {
        registry,
        clock,
        logs,
        namespaces,
    }
}

fn creds(uid: u32, log_group: bool) -> Credentials {
    match (uid, log_group) {
        (0, _) => Credentials::root(),
        (uid, true) => Credentials::user(uid).with_group(AID_LOG),
        (uid, false) => Credentials::user(uid),
    }
}

/// Reads everything pending, returning each record's header and payload.
fn drain(file: &LoggerFile, abi: HeaderAbi) -> Vec<(EntryHeader, Vec<u8>)> {
    let mut records = Vec::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match file.read(&mut buf) {
            Ok(n) => n,
            Err(DevError::WouldBlock) => return records,
            Err(err) => panic!("read failed: {err}"),
        };
        let mut pos = 0;
        while pos < n {
            let header = EntryHeader::decode(abi, &buf[pos..n]).unwrap();
            let start = pos + header.size();
            let end = start + header.payload_len();
            records.push((header, buf[start..end].to_vec()));
            pos = end;
        }
    }
}

proptest! {
    #[test]
    fn reader_sees_exactly_the_admitted_records(
        writes in prop::collection::vec((0usize..3, select(vec![0u32, 1000, 10_001])), 0..24),
        reader_ns in 0usize..3,
        reader_uid in select(vec![0u32, 1000, 10_001]),
        log_group in any::<bool>(),
        raw in any::<bool>(),
    ) {
        let s = setup();
        for (i, &(ns, uid)) in writes.iter().enumerate() {
            let task = Task::new(700 + u32::try_from(i).unwrap(), &s.namespaces[ns], creds(uid, false));
            let file = s.logs.open("main", &task, OpenFlags::WRITE).unwrap();
            file.write_raw(&task, &[u8::try_from(i).unwrap()]).unwrap();
        }

        let reader_task = Task::new(900, &s.namespaces[reader_ns], creds(reader_uid, log_group));
        let reader = if raw {
            match s.logs.open_raw("main", &reader_task, OpenFlags::READ) {
                Err(DevError::PermissionDenied) => {
                    prop_assert_ne!(reader_ns, 0);
                    return Ok(());
                }
                other => other.unwrap(),
            }
        } else {
            s.logs.open("main", &reader_task, OpenFlags::READ).unwrap()
        };

        let all = reader_uid == 0 || log_group;
        let expected: Vec<u8> = writes
            .iter()
            .enumerate()
            .filter(|&(_, &(ns, uid))| (all || uid == reader_uid) && (raw || ns == reader_ns))
            .map(|(i, _)| u8::try_from(i).unwrap())
            .collect();

        let got: Vec<u8> = drain(&reader, HeaderAbi::DEFAULT)
            .into_iter()
            .map(|(_, payload)| payload[0])
            .collect();
        prop_assert_eq!(got, expected);
    }
}

#[test]
fn every_header_version_carries_its_fields() {
    let s = setup();
    s.clock.set_realtime(Timespec::new(1_234, 5_678));
    let writer = Task::new(4_000, &s.namespaces[1], Credentials::user(10_050))
        .with_tid(4_001)
        .with_ns_ids(7, 8);
    s.logs
        .open("system", &writer, OpenFlags::WRITE)
        .unwrap()
        .write(&writer, 3, "svc", "up")
        .unwrap();

    let host = Task::new(1, s.registry.root(), Credentials::root());
    for word in [1, 2, 1 | LOGGER_NS_VERSION_FLAG, 2 | LOGGER_NS_VERSION_FLAG] {
        let reader = s.logs.open_raw("system", &host, OpenFlags::READ).unwrap();
        reader.ioctl(&host, LoggerCmd::SetVersion(word)).unwrap();
        let abi = HeaderAbi::from_word(word).unwrap();
        let records = drain(&reader, abi);
        assert_eq!(records.len(), 1, "version {word:#x}");
        let (header, payload) = &records[0];
        assert_eq!(payload, b"\x03svc\0up\0");

        match *header {
            EntryHeader::V1(e) => {
                assert_eq!((e.pid, e.tid, e.sec, e.nsec), (7, 8, 1_234, 5_678));
            }
            EntryHeader::V2(e) => {
                assert_eq!((e.pid, e.tid, e.euid, e.hdr_size), (7, 8, 10_050, 24));
            }
            EntryHeader::NsV1(p, e) => {
                assert_eq!((p.init_pid, p.real_pid, p.real_tid), (500, 4_000, 4_001));
                assert_eq!(p.tag, NsTag::from_name("a"));
                assert_eq!((e.pid, e.tid), (7, 8));
            }
            EntryHeader::NsV2(p, e) => {
                assert_eq!((p.init_pid, p.real_pid, p.real_tid), (500, 4_000, 4_001));
                assert_eq!((e.euid, e.hdr_size, usize::from(e.len)), (10_050, 40, payload.len()));
            }
        }
    }
}

#[test]
fn guest_cannot_widen_its_view() {
    let s = setup();
    let guest = Task::new(501, &s.namespaces[1], Credentials::root());
    let reader = s.logs.open("events", &guest, OpenFlags::READ).unwrap();
    assert_eq!(
        reader.ioctl(&guest, LoggerCmd::SetNsFilter(600)),
        Err(DevError::PermissionDenied)
    );
    assert_eq!(reader.filter().unwrap().ns, Some(Pid::new(500)));
}
