//! Testing utilities for handle cache unit and integration tests.
//!
//! This module provides:
//!
//! - **Mock handles**: [`MockHandle`] counts close calls without touching the OS
//! - **Counting filesystem**: [`CountingFileSystem`] records how often the
//!   caching layer reaches the OS, and can inject open failures
//! - **Assertions**: errno-aware I/O checks with helpful messages
//!
//! # Usage
//!
//! ```
//! use oxcrypt_fscache::testing::{CountingFileSystem, init_tracing};
//! use oxcrypt_fscache::{CachingFileSystem, FileSystemConfig, OsFileSystem};
//!
//! init_tracing();
//! let dir = tempfile::TempDir::new().unwrap();
//! let path = dir.path().join("segment");
//! std::fs::write(&path, b"data").unwrap();
//!
//! let fs = CachingFileSystem::with_api(
//!     CountingFileSystem::new(OsFileSystem),
//!     FileSystemConfig::default(),
//! )
//! .unwrap();
//!
//! fs.open_for_read(&path).unwrap();
//! fs.open_for_read(&path).unwrap();
//! assert_eq!(fs.api().open_count(&path), 1);
//! ```

pub mod assertions;
pub mod counting;
pub mod mock;

// Re-export commonly used items at the module level
pub use assertions::{assert_bytes_equal, assert_errno, assert_io_err, assert_io_ok};
pub use counting::CountingFileSystem;
pub use mock::MockHandle;

use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`, defaulting to `warn`. Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
