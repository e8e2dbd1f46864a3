//! Log record headers as read from the device.
//!
//! Four header layouts exist, chosen per reader by the version word it
//! negotiated: the low byte selects the ABI revision (1 or 2) and
//! [`LOGGER_NS_VERSION_FLAG`] asks for the namespace prefix. All fields are
//! little-endian.
//!
//! ```text
//! v1     len:u16 pad:u16 pid:i32 tid:i32 sec:i32 nsec:i32                 (20)
//! v2     len:u16 hdr_size:u16 pid:i32 tid:i32 sec:i32 nsec:i32 euid:u32   (24)
//! ns v1  init_pid:u32 real_pid:u32 real_tid:u32 tag:[u8;4] | v1           (36)
//! ns v2  init_pid:u32 real_pid:u32 real_tid:u32 tag:[u8;4] | v2           (40)
//! ```
//!
//! `pid` and `tid` are always the ids as seen inside the writer's own
//! namespace; the global ids only appear in the namespace prefix.

use devns_core::{DevError, NsTag};

use super::LogRecord;

/// Version-word bit requesting namespace-tagged headers.
pub const LOGGER_NS_VERSION_FLAG: u32 = 0x100;

const ABI_MASK: u32 = 0xff;

/// Size of the namespace prefix.
pub const NS_PREFIX_SIZE: usize = 16;
/// Size of a v1 header.
pub const V1_HEADER_SIZE: usize = 20;
/// Size of a v2 header.
pub const V2_HEADER_SIZE: usize = 24;

/// A negotiated header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderAbi {
    version: u8,
    ns: bool,
}

impl HeaderAbi {
    /// Layout a reader gets until it negotiates: plain v1.
    pub const DEFAULT: Self = Self { version: 1, ns: false };

    /// Parses a version word.
    ///
    /// # Errors
    ///
    /// [`DevError::InvalidArgument`] unless the low byte is 1 or 2 and no
    /// bit other than [`LOGGER_NS_VERSION_FLAG`] is set above it.
    pub fn from_word(word: u32) -> Result<Self, DevError> {
        if word & !(ABI_MASK | LOGGER_NS_VERSION_FLAG) != 0 {
            return Err(DevError::InvalidArgument);
        }
        let version = match word & ABI_MASK {
            1 => 1,
            2 => 2,
            _ => return Err(DevError::InvalidArgument),
        };
        Ok(Self {
            version,
            ns: word & LOGGER_NS_VERSION_FLAG != 0,
        })
    }

    /// The version word describing this layout.
    pub fn word(self) -> u32 {
        u32::from(self.version) | if self.ns { LOGGER_NS_VERSION_FLAG } else { 0 }
    }

    /// ABI revision, 1 or 2.
    pub fn version(self) -> u8 {
        self.version
    }

    /// Returns `true` if headers carry the namespace prefix.
    pub fn has_ns(self) -> bool {
        self.ns
    }

    /// Header size in bytes.
    pub fn header_size(self) -> usize {
        let base = if self.version == 1 { V1_HEADER_SIZE } else { V2_HEADER_SIZE };
        if self.ns { NS_PREFIX_SIZE + base } else { base }
    }
}

/// Where a record came from, in global terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsPrefix {
    /// Init pid of the writer's namespace.
    pub init_pid: u32,
    /// Writer's global pid.
    pub real_pid: u32,
    /// Writer's global tid.
    pub real_tid: u32,
    /// Writer's namespace tag.
    pub tag: NsTag,
}

/// `struct logger_entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryV1 {
    /// Payload length.
    pub len: u16,
    /// Writer's pid inside its namespace.
    pub pid: i32,
    /// Writer's tid inside its namespace.
    pub tid: i32,
    /// Seconds of the write timestamp.
    pub sec: i32,
    /// Nanoseconds of the write timestamp.
    pub nsec: i32,
}

/// `struct user_logger_entry_compat` with `hdr_size` and `euid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryV2 {
    /// Payload length.
    pub len: u16,
    /// Size of the whole header, namespace prefix included.
    pub hdr_size: u16,
    /// Writer's pid inside its namespace.
    pub pid: i32,
    /// Writer's tid inside its namespace.
    pub tid: i32,
    /// Seconds of the write timestamp.
    pub sec: i32,
    /// Nanoseconds of the write timestamp.
    pub nsec: i32,
    /// Writer's effective uid.
    pub euid: u32,
}

/// A record header in one of the four layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryHeader {
    /// Plain v1.
    V1(EntryV1),
    /// Plain v2.
    V2(EntryV2),
    /// Namespace prefix plus v1.
    NsV1(NsPrefix, EntryV1),
    /// Namespace prefix plus v2.
    NsV2(NsPrefix, EntryV2),
}

#[allow(clippy::cast_possible_wrap, reason = "pids are below i32::MAX")]
fn local_id(id: devns_core::Pid) -> i32 {
    id.as_u32() as i32
}

impl EntryHeader {
    /// Shapes `rec`'s header for a reader that negotiated `abi`.
    #[allow(clippy::cast_possible_truncation, reason = "payload and header sizes are bounded")]
    pub fn for_record(abi: HeaderAbi, rec: &LogRecord) -> Self {
        let len = rec.payload.len() as u16;
        let v1 = EntryV1 {
            len,
            pid: local_id(rec.pid),
            tid: local_id(rec.tid),
            sec: rec.sec,
            nsec: rec.nsec,
        };
        let v2 = EntryV2 {
            len,
            hdr_size: abi.header_size() as u16,
            pid: v1.pid,
            tid: v1.tid,
            sec: rec.sec,
            nsec: rec.nsec,
            euid: rec.euid.as_u32(),
        };
        let prefix = NsPrefix {
            init_pid: rec.ns_init_pid.as_u32(),
            real_pid: rec.real_pid.as_u32(),
            real_tid: rec.real_tid.as_u32(),
            tag: rec.ns_tag,
        };
        match (abi.version, abi.ns) {
            (1, false) => Self::V1(v1),
            (1, true) => Self::NsV1(prefix, v1),
            (_, false) => Self::V2(v2),
            (_, true) => Self::NsV2(prefix, v2),
        }
    }

    /// The layout this header is in.
    pub fn abi(&self) -> HeaderAbi {
        match self {
            Self::V1(_) => HeaderAbi { version: 1, ns: false },
            Self::V2(_) => HeaderAbi { version: 2, ns: false },
            Self::NsV1(..) => HeaderAbi { version: 1, ns: true },
            Self::NsV2(..) => HeaderAbi { version: 2, ns: true },
        }
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        self.abi().header_size()
    }

    /// Payload length the header announces.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::V1(e) | Self::NsV1(_, e) => usize::from(e.len),
            Self::V2(e) | Self::NsV2(_, e) => usize::from(e.len),
        }
    }

    /// Namespace prefix, for the namespace-aware layouts.
    pub fn prefix(&self) -> Option<&NsPrefix> {
        match self {
            Self::NsV1(p, _) | Self::NsV2(p, _) => Some(p),
            Self::V1(_) | Self::V2(_) => None,
        }
    }

    /// Writes the header to the front of `out`, returning its size.
    ///
    /// `out` must hold at least [`size`](Self::size) bytes.
    pub fn encode(&self, out: &mut [u8]) -> usize {
        let mut w = Writer { out, pos: 0 };
        match self {
            Self::V1(e) => w.v1(e),
            Self::V2(e) => w.v2(e),
            Self::NsV1(p, e) => {
                w.prefix(p);
                w.v1(e);
            }
            Self::NsV2(p, e) => {
                w.prefix(p);
                w.v2(e);
            }
        }
        w.pos
    }

    /// Parses a header in layout `abi` from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// [`DevError::InvalidArgument`] if `bytes` is shorter than the header.
    pub fn decode(abi: HeaderAbi, bytes: &[u8]) -> Result<Self, DevError> {
        if bytes.len() < abi.header_size() {
            return Err(DevError::InvalidArgument);
        }
        let mut r = Reader { bytes, pos: 0 };
        let prefix = abi.ns.then(|| r.prefix());
        let header = if abi.version == 1 {
            let len = r.u16();
            r.u16();
            let v1 = EntryV1 {
                len,
                pid: r.i32(),
                tid: r.i32(),
                sec: r.i32(),
                nsec: r.i32(),
            };
            match prefix {
                Some(p) => Self::NsV1(p, v1),
                None => Self::V1(v1),
            }
        } else {
            let v2 = EntryV2 {
                len: r.u16(),
                hdr_size: r.u16(),
                pid: r.i32(),
                tid: r.i32(),
                sec: r.i32(),
                nsec: r.i32(),
                euid: r.u32(),
            };
            match prefix {
                Some(p) => Self::NsV2(p, v2),
                None => Self::V2(v2),
            }
        };
        Ok(header)
    }
}

struct Writer<'a> {
    out: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn put(&mut self, bytes: &[u8]) {
        self.out[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn prefix(&mut self, p: &NsPrefix) {
        self.put(&p.init_pid.to_le_bytes());
        self.put(&p.real_pid.to_le_bytes());
        self.put(&p.real_tid.to_le_bytes());
        self.put(&p.tag.as_bytes());
    }

    fn v1(&mut self, e: &EntryV1) {
        self.put(&e.len.to_le_bytes());
        self.put(&0u16.to_le_bytes());
        self.put(&e.pid.to_le_bytes());
        self.put(&e.tid.to_le_bytes());
        self.put(&e.sec.to_le_bytes());
        self.put(&e.nsec.to_le_bytes());
    }

    fn v2(&mut self, e: &EntryV2) {
        self.put(&e.len.to_le_bytes());
        self.put(&e.hdr_size.to_le_bytes());
        self.put(&e.pid.to_le_bytes());
        self.put(&e.tid.to_le_bytes());
        self.put(&e.sec.to_le_bytes());
        self.put(&e.nsec.to_le_bytes());
        self.put(&e.euid.to_le_bytes());
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        buf
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn prefix(&mut self) -> NsPrefix {
        NsPrefix {
            init_pid: self.u32(),
            real_pid: self.u32(),
            real_tid: self.u32(),
            tag: NsTag::new(self.take()),
        }
    }
}
