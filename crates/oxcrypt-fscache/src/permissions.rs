//! POSIX permission sets applied to storage files.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// POSIX file permission bits (the low nine bits of `st_mode`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PosixPermissions: u32 {
        /// Owner may read.
        const OWNER_READ = 0o400;
        /// Owner may write.
        const OWNER_WRITE = 0o200;
        /// Owner may execute.
        const OWNER_EXECUTE = 0o100;
        /// Group may read.
        const GROUP_READ = 0o040;
        /// Group may write.
        const GROUP_WRITE = 0o020;
        /// Group may execute.
        const GROUP_EXECUTE = 0o010;
        /// Others may read.
        const OTHERS_READ = 0o004;
        /// Others may write.
        const OTHERS_WRITE = 0o002;
        /// Others may execute.
        const OTHERS_EXECUTE = 0o001;

        /// Sealed file: readable by everyone, writable by nobody (`r--r--r--`).
        const READ_ONLY = Self::OWNER_READ.bits()
            | Self::GROUP_READ.bits()
            | Self::OTHERS_READ.bits();

        /// Active file: owner read-write, everyone else read (`rw-r--r--`).
        const READ_WRITE = Self::OWNER_WRITE.bits()
            | Self::OWNER_READ.bits()
            | Self::GROUP_READ.bits()
            | Self::OTHERS_READ.bits();
    }
}

impl PosixPermissions {
    /// Extract the permission bits from a raw `st_mode`, ignoring file type
    /// and setuid/setgid/sticky bits.
    pub fn from_mode(mode: u32) -> Self {
        Self::from_bits_truncate(mode)
    }

    /// The raw mode bits, suitable for `chmod(2)` or `open(2)`.
    #[inline]
    pub fn mode(self) -> u32 {
        self.bits()
    }
}

impl fmt::Display for PosixPermissions {
    /// Renders the familiar `rwxr-x---` form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const BITS: [(PosixPermissions, char); 9] = [
            (PosixPermissions::OWNER_READ, 'r'),
            (PosixPermissions::OWNER_WRITE, 'w'),
            (PosixPermissions::OWNER_EXECUTE, 'x'),
            (PosixPermissions::GROUP_READ, 'r'),
            (PosixPermissions::GROUP_WRITE, 'w'),
            (PosixPermissions::GROUP_EXECUTE, 'x'),
            (PosixPermissions::OTHERS_READ, 'r'),
            (PosixPermissions::OTHERS_WRITE, 'w'),
            (PosixPermissions::OTHERS_EXECUTE, 'x'),
        ];
        for (flag, c) in BITS {
            let c = if self.contains(flag) { c } else { '-' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}
