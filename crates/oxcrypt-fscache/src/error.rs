//! Error types for the handle cache crate.
//!
//! Filesystem operations return `std::io::Result` so callers see OS failures
//! exactly as the OS reported them. Only configuration has its own error type.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors produced while building or loading a cache configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A cache was configured to hold no entries.
    #[error("{cache} cache max size must be at least 1")]
    ZeroCapacity {
        /// Which cache ("read" or "write").
        cache: &'static str,
    },

    /// A cache was configured to expire entries immediately.
    #[error("{cache} cache idle expiration must be non-zero")]
    ZeroIdleExpiration {
        /// Which cache ("read" or "write").
        cache: &'static str,
    },

    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The configuration file is not valid JSON for this schema.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Recover an owned `io::Error` from the shared error moka hands back when a
/// value initializer fails.
///
/// When this caller was the only one waiting on the initializer the original
/// error is returned as-is. Otherwise an equivalent error is rebuilt, keeping
/// the raw OS code when there is one so `raw_os_error()` and `kind()` match
/// what the opener returned.
pub(crate) fn unshare_io_error(err: Arc<io::Error>) -> io::Error {
    match Arc::try_unwrap(err) {
        Ok(err) => err,
        Err(shared) => match shared.raw_os_error() {
            Some(code) => io::Error::from_raw_os_error(code),
            None => io::Error::new(shared.kind(), shared.to_string()),
        },
    }
}
