//! [`FileSystemApi`] wrapper that counts OS calls.
//!
//! Wrap the real filesystem to check how often the caching layer actually
//! reaches the OS, and to inject open failures for a given path.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::handle::OpenMode;
use crate::os::{FileSystemApi, OsFileSystem};
use crate::permissions::PosixPermissions;

/// Counts opens, creates and deletes per path, then delegates to `F`.
#[derive(Debug, Default)]
pub struct CountingFileSystem<F: FileSystemApi = OsFileSystem> {
    inner: F,
    opens: DashMap<PathBuf, u64>,
    creates: AtomicU64,
    deletes: AtomicU64,
    injected: DashMap<PathBuf, i32>,
}

impl<F: FileSystemApi> CountingFileSystem<F> {
    /// Wrap `inner`.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            opens: DashMap::new(),
            creates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            injected: DashMap::new(),
        }
    }

    /// Successful and failed opens of `path`, in any mode.
    pub fn open_count(&self, path: impl AsRef<Path>) -> u64 {
        self.opens.get(path.as_ref()).map_or(0, |count| *count)
    }

    /// Opens across all paths.
    pub fn total_opens(&self) -> u64 {
        self.opens.iter().map(|entry| *entry.value()).sum()
    }

    /// Calls to `create_file`.
    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Calls to `delete`.
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Make every subsequent open of `path` fail with `errno`.
    pub fn fail_opens(&self, path: impl Into<PathBuf>, errno: i32) {
        self.injected.insert(path.into(), errno);
    }

    /// Stop injecting failures for `path`.
    pub fn clear_failure(&self, path: impl AsRef<Path>) {
        self.injected.remove(path.as_ref());
    }

    /// The wrapped filesystem.
    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: FileSystemApi> FileSystemApi for CountingFileSystem<F> {
    type Handle = F::Handle;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Self::Handle> {
        *self.opens.entry(path.to_path_buf()).or_insert(0) += 1;
        if let Some(errno) = self.injected.get(path) {
            return Err(io::Error::from_raw_os_error(*errno));
        }
        self.inner.open(path, mode)
    }

    fn create_file(&self, path: &Path, permissions: PosixPermissions) -> io::Result<PathBuf> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_file(path, permissions)
    }

    fn create_directories(&self, path: &Path) -> io::Result<PathBuf> {
        self.inner.create_directories(path)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_regular_file(&self, path: &Path) -> bool {
        self.inner.is_regular_file(path)
    }

    fn is_writable(&self, path: &Path) -> bool {
        self.inner.is_writable(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.inner.file_size(path)
    }

    fn used_space(&self, path: &Path) -> io::Result<u64> {
        self.inner.used_space(path)
    }

    fn set_permissions(&self, path: &Path, permissions: PosixPermissions) -> io::Result<PathBuf> {
        self.inner.set_permissions(path, permissions)
    }
}
