//! Open-file access modes shared by the character devices.

use bitflags::bitflags;

bitflags! {
    /// Access mode a device node was opened with (`O_ACCMODE`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Opened for reading.
        const READ = 1 << 0;
        /// Opened for writing.
        const WRITE = 1 << 1;
        /// `O_RDWR`.
        const RDWR = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl OpenFlags {
    /// Returns `true` for `O_RDONLY`.
    pub fn is_read_only(self) -> bool {
        !self.contains(Self::WRITE)
    }

    /// Returns `true` if the handle may read.
    pub fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    /// Returns `true` if the handle may write.
    pub fn can_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}
