//! Filesystem calls consumed by the caching layer.
//!
//! [`FileSystemApi`] is the seam between the handle caches and the OS. The
//! production implementation, [`OsFileSystem`], is a thin stateless mapping
//! onto `std::fs`, `statvfs(3)` and `access(2)`. Tests wrap it (see
//! [`testing::CountingFileSystem`](crate::testing::CountingFileSystem)) to
//! observe how often the cache actually reaches the OS.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::sys::statvfs::statvfs;
use nix::unistd::{access, AccessFlags};

use crate::handle::{CacheableHandle, FileHandle, OpenMode};
use crate::permissions::PosixPermissions;

/// Handle-based file access plus stateless metadata queries.
pub trait FileSystemApi: Send + Sync + 'static {
    /// Handle type produced by [`open`](Self::open).
    type Handle: CacheableHandle;

    /// Open `path` in the given mode.
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Self::Handle>;

    /// Create a new, empty file with the given permissions.
    ///
    /// Fails with `AlreadyExists` if the path exists.
    fn create_file(&self, path: &Path, permissions: PosixPermissions) -> io::Result<PathBuf>;

    /// Create a directory and all missing parents.
    fn create_directories(&self, path: &Path) -> io::Result<PathBuf>;

    /// Delete a file or an empty directory.
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Returns true if the path exists (following symlinks).
    fn exists(&self, path: &Path) -> bool;

    /// Returns true if the path is a regular file, without following symlinks.
    fn is_regular_file(&self, path: &Path) -> bool;

    /// Returns true if the calling process may write to the path.
    fn is_writable(&self, path: &Path) -> bool;

    /// Size of the file in bytes.
    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Bytes in use on the volume holding `path` (total minus usable).
    fn used_space(&self, path: &Path) -> io::Result<u64>;

    /// Replace the permission bits of `path`.
    fn set_permissions(&self, path: &Path, permissions: PosixPermissions) -> io::Result<PathBuf>;
}

/// [`FileSystemApi`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystemApi for OsFileSystem {
    type Handle = FileHandle;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<FileHandle> {
        FileHandle::open(path, mode)
    }

    fn create_file(&self, path: &Path, permissions: PosixPermissions) -> io::Result<PathBuf> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(permissions.mode())
            .open(path)?;
        Ok(path.to_path_buf())
    }

    fn create_directories(&self, path: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(path)?;
        Ok(path.to_path_buf())
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        if fs::symlink_metadata(path)?.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn exists(&self, path: &Path) -> bool {
        fs::metadata(path).is_ok()
    }

    fn is_regular_file(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_file())
    }

    fn is_writable(&self, path: &Path) -> bool {
        access(path, AccessFlags::W_OK).is_ok()
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn used_space(&self, path: &Path) -> io::Result<u64> {
        let stat = statvfs(path)?;
        // fragment_size is c_ulong, which is u64 on 64-bit targets
        #[allow(clippy::cast_lossless, clippy::unnecessary_cast)]
        let fragment_size = stat.fragment_size() as u64;
        #[allow(clippy::useless_conversion)]
        let total = u64::from(stat.blocks()) * fragment_size;
        #[allow(clippy::useless_conversion)]
        let usable = u64::from(stat.blocks_available()) * fragment_size;
        Ok(total.saturating_sub(usable))
    }

    fn set_permissions(&self, path: &Path, permissions: PosixPermissions) -> io::Result<PathBuf> {
        fs::set_permissions(path, fs::Permissions::from_mode(permissions.mode()))?;
        Ok(path.to_path_buf())
    }
}
