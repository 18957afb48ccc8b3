//! Open file handles stored in the handle caches.
//!
//! A [`FileHandle`] wraps an OS file descriptor and only exposes positioned
//! I/O (`pread`/`pwrite`), so a single cached handle can be shared by
//! concurrent callers without a shared cursor.
//!
//! # Closing
//!
//! Dropping a `std::fs::File` swallows errors from `close(2)`. Cached handles
//! are instead closed explicitly through [`CacheableHandle::close`], which
//! reports the OS error and is idempotent: only the first call releases the
//! descriptor, later calls are no-ops.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// A resource that can live in a [`HandleCache`](crate::HandleCache).
///
/// The cache's lifecycle guard is the only caller of [`close`](Self::close)
/// for handles obtained from a cache.
pub trait CacheableHandle: Send + Sync + 'static {
    /// Release the underlying OS resource.
    ///
    /// Must be idempotent. A second call returns `Ok(())` without touching
    /// the OS.
    fn close(&self) -> io::Result<()>;

    /// Returns true until the handle has been closed.
    fn is_open(&self) -> bool;

    /// The mode the handle was opened with, if it tracks one.
    fn open_mode(&self) -> Option<OpenMode> {
        None
    }
}

/// Mode in which a file is opened.
///
/// `Read` handles live in the read cache, every other mode in the write cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    /// Read-only access to an existing file.
    Read,
    /// Write access to an existing file.
    Write,
    /// Write access, creating the file if it does not exist.
    Create,
    /// Write access to a new file; fails if the file already exists.
    CreateNew,
    /// Append-only access to an existing file.
    Append,
}

impl OpenMode {
    /// Returns true for every mode served by the write cache.
    #[inline]
    pub fn is_write(self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    /// Short lowercase name, used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            OpenMode::Read => "read",
            OpenMode::Write => "write",
            OpenMode::Create => "create",
            OpenMode::CreateNew => "create_new",
            OpenMode::Append => "append",
        }
    }

    /// Translate this mode into `OpenOptions`.
    pub fn open_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true),
            OpenMode::Create => options.write(true).create(true),
            OpenMode::CreateNew => options.write(true).create_new(true),
            OpenMode::Append => options.append(true),
        };
        options
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open OS file handle with an explicit, fallible close.
///
/// I/O methods take `&self`; after [`close`](CacheableHandle::close) they
/// fail with `EBADF`.
pub struct FileHandle {
    path: PathBuf,
    mode: OpenMode,
    /// `None` once closed. I/O holds the read lock, close takes the write
    /// lock, so a descriptor is never released under an in-flight call.
    file: RwLock<Option<File>>,
}

impl FileHandle {
    /// Open `path` with the given mode.
    pub fn open(path: &Path, mode: OpenMode) -> io::Result<Self> {
        let file = mode.open_options().open(path)?;
        Ok(Self::from_file(file, path, mode))
    }

    /// Wrap an already-open file.
    pub fn from_file(file: File, path: impl Into<PathBuf>, mode: OpenMode) -> Self {
        Self {
            path: path.into(),
            mode,
            file: RwLock::new(Some(file)),
        }
    }

    /// The path this handle was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The mode this handle was opened with.
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    fn with_file<T>(&self, op: impl FnOnce(&File) -> io::Result<T>) -> io::Result<T> {
        let guard = self.file.read();
        match guard.as_ref() {
            Some(file) => op(file),
            None => Err(closed_handle_error()),
        }
    }

    /// Read up to `buf.len()` bytes starting at `offset`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.with_file(|file| file.read_at(buf, offset))
    }

    /// Read exactly `buf.len()` bytes starting at `offset`.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.with_file(|file| file.read_exact_at(buf, offset))
    }

    /// Write all of `buf` starting at `offset`.
    ///
    /// On Linux, `pwrite(2)` ignores `offset` for a descriptor opened with
    /// `O_APPEND`, so on an [`OpenMode::Append`] handle the data lands at the
    /// end of the file. The write cache is keyed by path alone, so a handle
    /// requested with [`OpenMode::Write`] can be one opened for append; check
    /// [`mode`](Self::mode) when the offset matters.
    pub fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.with_file(|file| file.write_all_at(buf, offset))
    }

    /// Write all of `buf` at the current end of file.
    ///
    /// Only meaningful for handles opened with [`OpenMode::Append`], where
    /// the kernel positions every write at EOF atomically.
    pub fn append(&self, buf: &[u8]) -> io::Result<()> {
        self.with_file(|file| {
            let mut writer = file;
            writer.write_all(buf)
        })
    }

    /// Flush file data (not metadata) to the device.
    pub fn sync_data(&self) -> io::Result<()> {
        self.with_file(File::sync_data)
    }

    /// Current size of the file in bytes.
    pub fn size(&self) -> io::Result<u64> {
        self.with_file(|file| file.metadata().map(|m| m.len()))
    }
}

impl CacheableHandle for FileHandle {
    fn close(&self) -> io::Result<()> {
        let Some(file) = self.file.write().take() else {
            return Ok(());
        };
        let fd = file.into_raw_fd();
        // SAFETY: `fd` was just released from an owned `File` and nothing else
        // refers to it, so it is closed exactly once here.
        let rc = unsafe { libc::close(fd) };
        if rc == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn is_open(&self) -> bool {
        self.file.read().is_some()
    }

    fn open_mode(&self) -> Option<OpenMode> {
        Some(self.mode)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .finish()
    }
}

fn closed_handle_error() -> io::Error {
    io::Error::from_raw_os_error(libc::EBADF)
}
