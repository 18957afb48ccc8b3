//! Construction configuration for the handle caches.
//!
//! Durations use humantime notation when (de)serialized:
//!
//! ```
//! use oxcrypt_fscache::FileSystemConfig;
//! use std::time::Duration;
//!
//! let config = FileSystemConfig::from_json_str(
//!     r#"{ "read_cache_max_size": 16, "write_idle_expiration": "150ms" }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.read_cache_max_size, 16);
//! assert_eq!(config.write_cache_max_size, 64);
//! assert_eq!(config.write_idle_expiration, Duration::from_millis(150));
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::guard::ReplacePolicy;

/// Default maximum number of resident read handles.
pub const DEFAULT_READ_CACHE_MAX_SIZE: u64 = 128;

/// Default maximum number of resident write handles.
pub const DEFAULT_WRITE_CACHE_MAX_SIZE: u64 = 64;

/// Default idle time after which a cached handle becomes eligible for closing.
pub const DEFAULT_IDLE_EXPIRATION: Duration = Duration::from_secs(60);

/// Settings for a single [`HandleCache`](crate::HandleCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleCacheConfig {
    /// Maximum number of resident entries.
    pub max_size: u64,
    /// An entry not accessed for this long is evicted.
    #[serde(with = "humantime_serde")]
    pub idle_expiration: Duration,
    /// What the lifecycle guard does with a handle displaced by `Replaced`.
    #[serde(default)]
    pub replace_policy: ReplacePolicy,
}

impl HandleCacheConfig {
    /// Create a config with the default replace policy.
    pub fn new(max_size: u64, idle_expiration: Duration) -> Self {
        Self {
            max_size,
            idle_expiration,
            replace_policy: ReplacePolicy::default(),
        }
    }

    /// Set the replace policy.
    #[must_use]
    pub fn with_replace_policy(mut self, policy: ReplacePolicy) -> Self {
        self.replace_policy = policy;
        self
    }

    /// Check the settings for `cache` ("read" or "write").
    pub fn validate(&self, cache: &'static str) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroCapacity { cache });
        }
        if self.idle_expiration.is_zero() {
            return Err(ConfigError::ZeroIdleExpiration { cache });
        }
        Ok(())
    }
}

/// Configuration for [`CachingFileSystem`](crate::CachingFileSystem).
///
/// The read and write caches are configured independently. Missing fields
/// fall back to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSystemConfig {
    /// Maximum resident read handles.
    pub read_cache_max_size: u64,
    /// Maximum resident write handles.
    pub write_cache_max_size: u64,
    /// Idle expiration for read handles.
    #[serde(with = "humantime_serde")]
    pub read_idle_expiration: Duration,
    /// Idle expiration for write handles.
    #[serde(with = "humantime_serde")]
    pub write_idle_expiration: Duration,
    /// Replace policy shared by both caches.
    pub replace_policy: ReplacePolicy,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            read_cache_max_size: DEFAULT_READ_CACHE_MAX_SIZE,
            write_cache_max_size: DEFAULT_WRITE_CACHE_MAX_SIZE,
            read_idle_expiration: DEFAULT_IDLE_EXPIRATION,
            write_idle_expiration: DEFAULT_IDLE_EXPIRATION,
            replace_policy: ReplacePolicy::default(),
        }
    }
}

impl FileSystemConfig {
    /// Create a config from the four cache settings.
    pub fn new(
        read_cache_max_size: u64,
        write_cache_max_size: u64,
        read_idle_expiration: Duration,
        write_idle_expiration: Duration,
    ) -> Self {
        Self {
            read_cache_max_size,
            write_cache_max_size,
            read_idle_expiration,
            write_idle_expiration,
            replace_policy: ReplacePolicy::default(),
        }
    }

    /// Settings for the read cache.
    pub fn read_cache(&self) -> HandleCacheConfig {
        HandleCacheConfig::new(self.read_cache_max_size, self.read_idle_expiration)
            .with_replace_policy(self.replace_policy)
    }

    /// Settings for the write cache.
    pub fn write_cache(&self) -> HandleCacheConfig {
        HandleCacheConfig::new(self.write_cache_max_size, self.write_idle_expiration)
            .with_replace_policy(self.replace_policy)
    }

    /// Check both cache settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.read_cache().validate("read")?;
        self.write_cache().validate("write")
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
