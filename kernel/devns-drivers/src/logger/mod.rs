//! The kernel log buffers (`/dev/log/{main,events,radio,system}`).
//!
//! Storage is shared: all namespaces write into the same four rings. What
//! keeps them apart is that every [`LogRecord`] remembers the writer's
//! namespace (init pid, tag, and global pid/tid) and every reader carries a
//! [`ReadFilter`]:
//!
//! - a reader only sees its own euid's records unless it holds
//!   [`Capabilities::SYSLOG`] or is in the log group;
//! - a reader only sees its own namespace's records unless it cleared the
//!   filter (root namespace only) or opened the raw node.
//!
//! Headers are shaped per reader according to the negotiated version word;
//! see [`entry`].

pub mod entry;

mod buffer;

use alloc::sync::Arc;
use alloc::vec::Vec;

use devns_core::sync::SpinLock;
use devns_core::task::{Capabilities, Task};
use devns_core::time::SystemClock;
use devns_core::{DevError, Gid, NsTag, Pid, Uid};

use self::buffer::Ring;
use self::entry::{EntryHeader, HeaderAbi};
use crate::config::{AID_LOG, LOG_BUF_SIZE, LOG_BUFFER_NAMES, LOGGER_ENTRY_MAX_PAYLOAD};
use crate::file::OpenFlags;

/// A stored log record.
///
/// The ring keeps records in this canonical form and shapes a header for
/// each reader on the way out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Init pid of the writer's namespace.
    pub ns_init_pid: Pid,
    /// Writer's global pid.
    pub real_pid: Pid,
    /// Writer's global tid.
    pub real_tid: Pid,
    /// Writer's namespace tag.
    pub ns_tag: NsTag,
    /// Writer's pid inside its namespace.
    pub pid: Pid,
    /// Writer's tid inside its namespace.
    pub tid: Pid,
    /// Seconds of the write timestamp.
    pub sec: i32,
    /// Nanoseconds of the write timestamp.
    pub nsec: i32,
    /// Writer's effective uid.
    pub euid: Uid,
    /// Payload, at most [`LOGGER_ENTRY_MAX_PAYLOAD`] bytes.
    pub payload: Vec<u8>,
}

/// Which records a reader is allowed to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadFilter {
    /// Sees every uid's records.
    pub all: bool,
    /// The reader's effective uid.
    pub euid: Uid,
    /// Only records from the namespace with this init pid, if set.
    pub ns: Option<Pid>,
}

impl ReadFilter {
    /// Returns `true` if a reader with this filter may see `rec`.
    pub fn admits(&self, rec: &LogRecord) -> bool {
        (self.all || rec.euid == self.euid) && self.ns.is_none_or(|ns| rec.ns_init_pid == ns)
    }
}

/// Logger ioctls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerCmd {
    /// Capacity of the buffer in bytes.
    GetLogBufSize,
    /// Bytes this reader could still read.
    GetLogLen,
    /// Size of the next record this reader would get, header included, or 0.
    GetNextEntryLen,
    /// Drops buffered records. Needs a writable handle.
    FlushLog,
    /// This reader's version word.
    GetVersion,
    /// Negotiates the header layout.
    SetVersion(u32),
    /// Selects the namespace to read (0 for every namespace). Root namespace
    /// only.
    SetNsFilter(i32),
}

/// One log buffer.
pub struct LogBuffer {
    name: &'static str,
    clock: Arc<SystemClock>,
    ring: SpinLock<Ring>,
}

impl LogBuffer {
    /// Creates an empty buffer holding up to `size` bytes of records.
    pub fn new(name: &'static str, size: usize, clock: Arc<SystemClock>) -> Arc<Self> {
        Arc::new(Self {
            name,
            clock,
            ring: SpinLock::new(Ring::new(size)),
        })
    }

    /// Buffer name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// Returns `true` if the buffer holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently used.
    pub fn used(&self) -> usize {
        self.ring.lock().used()
    }

    /// A copy of every record held, oldest first.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.ring.lock().since(0).map(|(_, rec)| rec.clone()).collect()
    }

    /// Opens the buffer. Readers see their own namespace by default.
    ///
    /// # Errors
    ///
    /// [`DevError::InvalidArgument`] for an empty access mode.
    pub fn open(self: &Arc<Self>, task: &Task, flags: OpenFlags) -> Result<LoggerFile, DevError> {
        self.open_with(task, flags, Some(task.ns().init_pid()))
    }

    /// Opens the buffer without namespace filtering.
    ///
    /// # Errors
    ///
    /// [`DevError::PermissionDenied`] outside the root namespace, or
    /// [`DevError::InvalidArgument`] for an empty access mode.
    pub fn open_raw(self: &Arc<Self>, task: &Task, flags: OpenFlags) -> Result<LoggerFile, DevError> {
        if !task.ns().is_init() {
            return Err(DevError::PermissionDenied);
        }
        self.open_with(task, flags, None)
    }

    fn open_with(self: &Arc<Self>, task: &Task, flags: OpenFlags, ns: Option<Pid>) -> Result<LoggerFile, DevError> {
        if flags.is_empty() {
            return Err(DevError::InvalidArgument);
        }
        let reader = flags.can_read().then(|| {
            let filter = ReadFilter {
                all: task.capable(Capabilities::SYSLOG) || task.in_group(Gid::new(AID_LOG)),
                euid: task.euid(),
                ns,
            };
            let cursor = self.ring.lock().head_seq();
            log::debug!(
                "logger: {} opened by pid {} (ns {}), filter {:?}",
                self.name,
                task.pid(),
                task.ns().init_pid(),
                filter
            );
            Reader {
                cursor,
                abi: HeaderAbi::DEFAULT,
                filter,
            }
        });
        Ok(LoggerFile {
            buf: self.clone(),
            flags,
            reader: reader.map(SpinLock::new),
        })
    }

    fn append(&self, task: &Task, mut payload: Vec<u8>) -> usize {
        payload.truncate(LOGGER_ENTRY_MAX_PAYLOAD);
        let now = self.clock.realtime();
        let ns = task.ns();
        let len = payload.len();
        let rec = LogRecord {
            ns_init_pid: ns.init_pid(),
            real_pid: task.pid(),
            real_tid: task.tid(),
            ns_tag: ns.tag(),
            pid: task.ns_pid(),
            tid: task.ns_tid(),
            sec: i32::try_from(now.tv_sec).unwrap_or(i32::MAX),
            nsec: i32::try_from(now.tv_nsec).unwrap_or(0),
            euid: task.euid(),
            payload,
        };
        let evicted = self.ring.lock().push(rec);
        if evicted > 0 {
            log::trace!("logger: {} overran, dropped {evicted} records", self.name);
        }
        len
    }
}

struct Reader {
    cursor: u64,
    abi: HeaderAbi,
    filter: ReadFilter,
}

impl Reader {
    fn entry_len(&self, rec: &LogRecord) -> usize {
        self.abi.header_size() + rec.payload.len()
    }
}

/// An open log buffer.
pub struct LoggerFile {
    buf: Arc<LogBuffer>,
    flags: OpenFlags,
    reader: Option<SpinLock<Reader>>,
}

impl LoggerFile {
    /// The buffer this handle is open on.
    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buf
    }

    /// Access mode.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// This reader's filter, if the handle can read.
    pub fn filter(&self) -> Option<ReadFilter> {
        self.reader.as_ref().map(|r| r.lock().filter)
    }

    /// Writes a text record: priority byte, NUL-terminated tag, then the
    /// NUL-terminated message. Returns the payload bytes stored.
    ///
    /// # Errors
    ///
    /// [`DevError::BadFile`] if the handle is not writable.
    pub fn write(&self, task: &Task, prio: u8, tag: &str, msg: &str) -> Result<usize, DevError> {
        let mut payload = Vec::with_capacity(tag.len() + msg.len() + 3);
        payload.push(prio);
        payload.extend_from_slice(tag.as_bytes());
        payload.push(0);
        payload.extend_from_slice(msg.as_bytes());
        payload.push(0);
        self.write_raw(task, &payload)
    }

    /// Writes `payload` as one record, truncated to
    /// [`LOGGER_ENTRY_MAX_PAYLOAD`]. Returns the payload bytes stored.
    ///
    /// # Errors
    ///
    /// [`DevError::BadFile`] if the handle is not writable.
    pub fn write_raw(&self, task: &Task, payload: &[u8]) -> Result<usize, DevError> {
        if !self.flags.can_write() {
            return Err(DevError::BadFile);
        }
        Ok(self.buf.append(task, payload.to_vec()))
    }

    /// Copies as many whole records visible to this reader as fit into `out`,
    /// at least one. Never blocks.
    ///
    /// # Errors
    ///
    /// - [`DevError::BadFile`] if the handle is not readable.
    /// - [`DevError::WouldBlock`] if no visible record is pending.
    /// - [`DevError::InvalidArgument`] if the next record does not fit.
    pub fn read(&self, out: &mut [u8]) -> Result<usize, DevError> {
        let reader = self.reader.as_ref().ok_or(DevError::BadFile)?;
        let mut reader = reader.lock();
        let ring = self.buf.ring.lock();
        if ring.fix_up(&mut reader.cursor) {
            log::debug!("logger: {} reader overrun, resuming at the oldest record", self.buf.name);
        }

        let mut copied = 0;
        let mut cursor = reader.cursor;
        for (seq, rec) in ring.since(reader.cursor) {
            if !reader.filter.admits(rec) {
                cursor = seq + 1;
                continue;
            }
            let len = reader.entry_len(rec);
            if copied + len > out.len() {
                if copied == 0 {
                    return Err(DevError::InvalidArgument);
                }
                break;
            }
            let header = EntryHeader::for_record(reader.abi, rec);
            let dst = &mut out[copied..copied + len];
            let hdr_len = header.encode(dst);
            dst[hdr_len..].copy_from_slice(&rec.payload);
            copied += len;
            cursor = seq + 1;
        }
        reader.cursor = cursor;

        if copied == 0 { Err(DevError::WouldBlock) } else { Ok(copied) }
    }

    /// Handles a logger ioctl issued by `task`.
    ///
    /// # Errors
    ///
    /// - [`DevError::BadFile`] for reader queries on a write-only handle or
    ///   a flush on a read-only one.
    /// - [`DevError::InvalidArgument`] for a bad version word or a negative
    ///   filter pid.
    /// - [`DevError::PermissionDenied`] for a filter change outside the root
    ///   namespace.
    pub fn ioctl(&self, task: &Task, cmd: LoggerCmd) -> Result<usize, DevError> {
        match cmd {
            LoggerCmd::GetLogBufSize => Ok(self.buf.ring.lock().capacity()),
            LoggerCmd::GetLogLen => {
                let mut reader = self.reader()?.lock();
                let ring = self.buf.ring.lock();
                ring.fix_up(&mut reader.cursor);
                Ok(ring
                    .since(reader.cursor)
                    .filter(|(_, rec)| reader.filter.admits(rec))
                    .map(|(_, rec)| reader.entry_len(rec))
                    .sum())
            }
            LoggerCmd::GetNextEntryLen => {
                let mut reader = self.reader()?.lock();
                let ring = self.buf.ring.lock();
                ring.fix_up(&mut reader.cursor);
                Ok(ring
                    .since(reader.cursor)
                    .find(|(_, rec)| reader.filter.admits(rec))
                    .map_or(0, |(_, rec)| reader.entry_len(rec)))
            }
            LoggerCmd::FlushLog => {
                if !self.flags.can_write() {
                    return Err(DevError::BadFile);
                }
                let ns = task.ns();
                let scope = (!ns.is_init()).then(|| ns.init_pid());
                let dropped = self.buf.ring.lock().flush(scope);
                log::info!(
                    "logger: {} flushed by pid {} (ns {}), {dropped} records dropped",
                    self.buf.name,
                    task.pid(),
                    ns.init_pid()
                );
                Ok(0)
            }
            LoggerCmd::GetVersion => Ok(self.reader()?.lock().abi.word() as usize),
            LoggerCmd::SetVersion(word) => {
                let reader = self.reader()?;
                let abi = HeaderAbi::from_word(word)?;
                reader.lock().abi = abi;
                Ok(0)
            }
            LoggerCmd::SetNsFilter(init_pid) => {
                let reader = self.reader()?;
                if !task.ns().is_init() {
                    return Err(DevError::PermissionDenied);
                }
                let ns = match u32::try_from(init_pid) {
                    Err(_) => return Err(DevError::InvalidArgument),
                    Ok(0) => None,
                    Ok(pid) => Some(Pid::new(pid)),
                };
                reader.lock().filter.ns = ns;
                Ok(0)
            }
        }
    }

    fn reader(&self) -> Result<&SpinLock<Reader>, DevError> {
        self.reader.as_ref().ok_or(DevError::BadFile)
    }

    /// Closes the handle.
    pub fn release(self) {}
}

/// The four log buffers.
pub struct LoggerDevices {
    buffers: [Arc<LogBuffer>; 4],
}

impl LoggerDevices {
    /// Creates the standard buffers, [`LOG_BUF_SIZE`] bytes each.
    pub fn new(clock: &Arc<SystemClock>) -> Self {
        Self::with_size(clock, LOG_BUF_SIZE)
    }

    /// Creates the standard buffers with `size` bytes each.
    pub fn with_size(clock: &Arc<SystemClock>, size: usize) -> Self {
        let buffers = LOG_BUFFER_NAMES.map(|name| LogBuffer::new(name, size, clock.clone()));
        log::info!("logger: created {} buffers of {size} bytes", buffers.len());
        Self { buffers }
    }

    /// Looks a buffer up by name.
    pub fn buffer(&self, name: &str) -> Option<&Arc<LogBuffer>> {
        self.buffers.iter().find(|b| b.name == name)
    }

    /// Every buffer, in device-node order.
    pub fn buffers(&self) -> &[Arc<LogBuffer>] {
        &self.buffers
    }

    /// Opens buffer `name`.
    ///
    /// # Errors
    ///
    /// [`DevError::NotFound`] for an unknown buffer, otherwise as
    /// [`LogBuffer::open`].
    pub fn open(&self, name: &str, task: &Task, flags: OpenFlags) -> Result<LoggerFile, DevError> {
        self.buffer(name).ok_or(DevError::NotFound)?.open(task, flags)
    }

    /// Opens buffer `name` without namespace filtering.
    ///
    /// # Errors
    ///
    /// [`DevError::NotFound`] for an unknown buffer, otherwise as
    /// [`LogBuffer::open_raw`].
    pub fn open_raw(&self, name: &str, task: &Task, flags: OpenFlags) -> Result<LoggerFile, DevError> {
        self.buffer(name).ok_or(DevError::NotFound)?.open_raw(task, flags)
    }
}
