//! Filesystem façade with cached read and write handles.
//!
//! [`CachingFileSystem`] combines two [`HandleCache`]s, one for read handles
//! and one for write handles, with plain delegation for every operation that
//! does not need a handle. Creating or deleting a path first invalidates it
//! in both caches, so a recreated file is never served through a stale
//! descriptor.
//!
//! Keys are absolute, lexically normalized paths: `data/./seg` and
//! `$CWD/data/seg` share an entry. Symlinks are not resolved.

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::HandleCache;
use crate::config::FileSystemConfig;
use crate::error::ConfigError;
use crate::handle::{CacheableHandle, OpenMode};
use crate::os::{FileSystemApi, OsFileSystem};
use crate::permissions::PosixPermissions;
use crate::stats::FileSystemStatsSnapshot;

/// Resolve `path` against the working directory and drop `.`/`..` lexically.
pub fn normalize_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Cache key for `path`: its normalized form rendered as a string.
pub fn cache_key(path: &Path) -> io::Result<String> {
    Ok(normalize_path(path)?.to_string_lossy().into_owned())
}

fn resolve(path: &Path) -> io::Result<(PathBuf, String)> {
    let normalized = normalize_path(path)?;
    let key = normalized.to_string_lossy().into_owned();
    Ok((normalized, key))
}

/// Filesystem access with bounded caches of open handles.
///
/// Cloning is cheap; clones share the same caches and OS API.
pub struct CachingFileSystem<F: FileSystemApi = OsFileSystem> {
    api: Arc<F>,
    config: FileSystemConfig,
    read_cache: Arc<HandleCache<F::Handle>>,
    write_cache: Arc<HandleCache<F::Handle>>,
}

impl CachingFileSystem<OsFileSystem> {
    /// Create a façade over the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either cache has a zero size or idle time.
    pub fn new(config: FileSystemConfig) -> Result<Self, ConfigError> {
        Self::with_api(OsFileSystem, config)
    }
}

impl<F: FileSystemApi> CachingFileSystem<F> {
    /// Create a façade over a custom [`FileSystemApi`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either cache has a zero size or idle time.
    pub fn with_api(api: F, config: FileSystemConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let read_cache = Arc::new(HandleCache::new("read", config.read_cache()));
        let write_cache = Arc::new(HandleCache::new("write", config.write_cache()));

        info!(
            read_max = config.read_cache_max_size,
            write_max = config.write_cache_max_size,
            read_idle = ?config.read_idle_expiration,
            write_idle = ?config.write_idle_expiration,
            "Created caching filesystem"
        );

        Ok(Self {
            api: Arc::new(api),
            config,
            read_cache,
            write_cache,
        })
    }

    /// Return the cached read handle for `path`, opening it on a miss.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the file cannot be opened; nothing is cached.
    pub fn open_for_read(&self, path: impl AsRef<Path>) -> io::Result<Arc<F::Handle>> {
        let (normalized, key) = resolve(path.as_ref())?;
        self.read_cache.get_or_open(&key, || {
            info!(path = %key, "Opening file for read");
            self.api.open(&normalized, OpenMode::Read)
        })
    }

    /// Return the cached write handle for `path`, opening it with `mode` on a miss.
    ///
    /// The write cache is keyed by path alone. If a handle for `path` is
    /// already cached, it is returned whatever mode it was opened with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for [`OpenMode::Read`], or the OS error if the
    /// file cannot be opened.
    pub fn open_for_write(
        &self,
        path: impl AsRef<Path>,
        mode: OpenMode,
    ) -> io::Result<Arc<F::Handle>> {
        if !mode.is_write() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "open_for_write requires a write mode",
            ));
        }
        let (normalized, key) = resolve(path.as_ref())?;
        let handle = self.write_cache.get_or_open(&key, || {
            info!(path = %key, %mode, "Opening file for write");
            self.api.open(&normalized, mode)
        })?;
        if let Some(cached) = handle.open_mode().filter(|cached| *cached != mode) {
            debug!(
                path = %key,
                requested = %mode,
                %cached,
                "Reusing write handle opened with a different mode"
            );
        }
        Ok(handle)
    }

    /// Route to [`open_for_read`](Self::open_for_read) or
    /// [`open_for_write`](Self::open_for_write) by mode.
    pub fn open(&self, path: impl AsRef<Path>, mode: OpenMode) -> io::Result<Arc<F::Handle>> {
        debug!(path = %path.as_ref().display(), %mode, "Routing open");
        if mode.is_write() {
            self.open_for_write(path, mode)
        } else {
            self.open_for_read(path)
        }
    }

    /// Close any cached handles for `path` and create it as a new file.
    ///
    /// # Errors
    ///
    /// Returns the OS error, e.g. `AlreadyExists`. The caches are
    /// invalidated even when creation fails.
    pub fn create_file(
        &self,
        path: impl AsRef<Path>,
        permissions: PosixPermissions,
    ) -> io::Result<PathBuf> {
        let (normalized, key) = resolve(path.as_ref())?;
        self.invalidate(&key);
        self.api.create_file(&normalized, permissions)
    }

    /// Close any cached handles for `path` and delete it.
    ///
    /// # Errors
    ///
    /// Returns the OS error, e.g. `NotFound` or a non-empty directory. The
    /// caches are invalidated even when deletion fails.
    pub fn delete(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let (normalized, key) = resolve(path.as_ref())?;
        self.invalidate(&key);
        self.api.delete(&normalized)
    }

    fn invalidate(&self, key: &str) {
        self.read_cache.invalidate(key);
        self.write_cache.invalidate(key);
    }

    /// Close every cached handle in both caches.
    pub fn close_all(&self) {
        self.read_cache.invalidate_all();
        self.write_cache.invalidate_all();
        info!("Closed all cached file handles");
    }

    /// Run pending size and idle evictions in both caches.
    pub fn run_maintenance(&self) {
        self.read_cache.run_maintenance();
        self.write_cache.run_maintenance();
    }

    /// Create a directory and any missing parents.
    pub fn create_directories(&self, path: impl AsRef<Path>) -> io::Result<PathBuf> {
        self.api.create_directories(path.as_ref())
    }

    /// Returns true if `path` exists.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.api.exists(path.as_ref())
    }

    /// Returns true if `path` is a regular file. Symlinks are not followed.
    pub fn is_regular_file(&self, path: impl AsRef<Path>) -> bool {
        self.api.is_regular_file(path.as_ref())
    }

    /// Returns true if this process may write to `path`.
    pub fn is_writable(&self, path: impl AsRef<Path>) -> bool {
        self.api.is_writable(path.as_ref())
    }

    /// Size of `path` in bytes.
    pub fn file_size(&self, path: impl AsRef<Path>) -> io::Result<u64> {
        self.api.file_size(path.as_ref())
    }

    /// Used bytes on the volume holding `path`.
    pub fn used_space(&self, path: impl AsRef<Path>) -> io::Result<u64> {
        self.api.used_space(path.as_ref())
    }

    /// Replace the permission bits of `path`.
    pub fn set_permissions(
        &self,
        path: impl AsRef<Path>,
        permissions: PosixPermissions,
    ) -> io::Result<PathBuf> {
        self.api.set_permissions(path.as_ref(), permissions)
    }

    /// The read handle cache.
    pub fn read_cache(&self) -> &Arc<HandleCache<F::Handle>> {
        &self.read_cache
    }

    /// The write handle cache.
    pub fn write_cache(&self) -> &Arc<HandleCache<F::Handle>> {
        &self.write_cache
    }

    /// Counters of both caches.
    pub fn stats(&self) -> FileSystemStatsSnapshot {
        FileSystemStatsSnapshot {
            read: self.read_cache.stats().snapshot(),
            write: self.write_cache.stats().snapshot(),
        }
    }

    /// The configuration this façade was built with.
    pub fn config(&self) -> &FileSystemConfig {
        &self.config
    }

    /// The underlying OS API.
    pub fn api(&self) -> &F {
        &self.api
    }
}

impl<F: FileSystemApi> Clone for CachingFileSystem<F> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            config: self.config,
            read_cache: Arc::clone(&self.read_cache),
            write_cache: Arc::clone(&self.write_cache),
        }
    }
}

impl<F: FileSystemApi> fmt::Debug for CachingFileSystem<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingFileSystem")
            .field("config", &self.config)
            .field("read_cache", &self.read_cache)
            .field("write_cache", &self.write_cache)
            .field("read_resident", &self.read_cache.stats().resident_count())
            .field("write_resident", &self.write_cache.stats().resident_count())
            .finish_non_exhaustive()
    }
}
