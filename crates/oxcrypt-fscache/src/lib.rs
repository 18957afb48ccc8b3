//! Bounded cache of open file handles for local storage backends.
//!
//! Storage layers that repeatedly read and append to the same files pay for
//! an `open(2)`/`close(2)` pair on every operation. This crate keeps recently
//! used handles open and shares them between callers, while guaranteeing the
//! number of open descriptors stays bounded and every descriptor is closed
//! exactly once.
//!
//! # Components
//!
//! ## Caching
//!
//! - [`HandleCache`] - Bounded, idle-expiring map from path to shared handle
//! - [`LifecycleGuard`] - Removal hook; the only place cached handles are closed
//! - [`CachingFileSystem`] - Façade with a read cache, a write cache and
//!   direct delegation for metadata operations
//!
//! ## Handles and the OS
//!
//! - [`FileHandle`] - Positioned-I/O file handle with an explicit, fallible close
//! - [`FileSystemApi`] - Trait over the OS calls the façade makes
//! - [`OsFileSystem`] - `std::fs`/`nix` implementation of [`FileSystemApi`]
//! - [`PosixPermissions`] - Permission bits, with `READ_ONLY` and `READ_WRITE`
//!
//! ## Configuration and Observability
//!
//! - [`FileSystemConfig`] - Per-cache size and idle settings, loadable from JSON
//! - [`stats`] - Lock-free hit, open, close and eviction counters
//!
//! # Why a Lifecycle Guard?
//!
//! A handle can leave a cache in several ways: the size bound pushes it out,
//! it sits idle too long, or a create/delete of its path invalidates it.
//! These can race. Routing every removal through one eviction listener means
//! the close happens exactly once, on whichever thread won, and callers that
//! still hold the `Arc` see `EBADF` rather than a recycled descriptor.
//!
//! # Example
//!
//! ```
//! use oxcrypt_fscache::{CachingFileSystem, FileSystemConfig, OpenMode, PosixPermissions};
//! use std::sync::Arc;
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let path = dir.path().join("segment-0");
//!
//! let fs = CachingFileSystem::new(FileSystemConfig::default()).unwrap();
//! fs.create_file(&path, PosixPermissions::READ_WRITE).unwrap();
//!
//! let writer = fs.open_for_write(&path, OpenMode::Append).unwrap();
//! writer.append(b"hello").unwrap();
//!
//! let reader = fs.open_for_read(&path).unwrap();
//! let mut buf = [0u8; 5];
//! reader.read_exact_at(&mut buf, 0).unwrap();
//! assert_eq!(&buf, b"hello");
//!
//! // Same handle on the next request
//! assert!(Arc::ptr_eq(&reader, &fs.open_for_read(&path).unwrap()));
//!
//! // Deleting closes both cached handles first
//! fs.delete(&path).unwrap();
//! assert_eq!(fs.stats().total_closes(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod config;
mod error;
mod guard;
mod handle;
mod os;
mod permissions;
pub mod stats;
mod wrapper;

pub use cache::HandleCache;
pub use config::{
    FileSystemConfig, HandleCacheConfig, DEFAULT_IDLE_EXPIRATION, DEFAULT_READ_CACHE_MAX_SIZE,
    DEFAULT_WRITE_CACHE_MAX_SIZE,
};
pub use error::ConfigError;
pub use guard::{EvictionCause, LifecycleGuard, RemovalOutcome, ReplacePolicy};
pub use handle::{CacheableHandle, FileHandle, OpenMode};
pub use os::{FileSystemApi, OsFileSystem};
pub use permissions::PosixPermissions;
pub use stats::{FileSystemStatsSnapshot, HandleCacheStats, HandleCacheStatsSnapshot};
pub use wrapper::{cache_key, normalize_path, CachingFileSystem};

/// Testing utilities for handle cache tests.
///
/// Provides shared test infrastructure:
/// - A mock handle that counts closes
/// - An OS API wrapper that counts opens and injects failures
/// - errno-aware I/O assertions
pub mod testing;
