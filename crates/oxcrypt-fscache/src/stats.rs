//! Statistics tracking for the handle caches.
//!
//! All counters are lock-free atomics so recording never contends with the
//! cache's own locking. The lifecycle guard records removals and closes; the
//! cache records hits, misses and opens.
//!
//! # Usage
//!
//! ```
//! use oxcrypt_fscache::stats::HandleCacheStats;
//!
//! let stats = HandleCacheStats::new();
//! stats.record_hit();
//! stats.record_miss();
//!
//! let snapshot = stats.snapshot();
//! assert_eq!(snapshot.hit_rate(), 0.5);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::guard::EvictionCause;

/// Counters for one handle cache.
#[derive(Debug, Default)]
pub struct HandleCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    opens: AtomicU64,
    open_failures: AtomicU64,
    closes: AtomicU64,
    close_failures: AtomicU64,
    invalidated: AtomicU64,
    size_evicted: AtomicU64,
    expired: AtomicU64,
    replaced: AtomicU64,
}

impl HandleCacheStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lookup served from the cache.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lookup that had to open.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful OS open.
    #[inline]
    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed OS open.
    #[inline]
    pub fn record_open_failure(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handle closed by the lifecycle guard.
    #[inline]
    pub fn record_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a close that returned an OS error.
    #[inline]
    pub fn record_close_failure(&self) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an entry leaving the cache.
    #[inline]
    pub fn record_removal(&self, cause: EvictionCause) {
        self.removal_counter(cause).fetch_add(1, Ordering::Relaxed);
    }

    fn removal_counter(&self, cause: EvictionCause) -> &AtomicU64 {
        match cause {
            EvictionCause::Invalidated => &self.invalidated,
            EvictionCause::SizeEvicted => &self.size_evicted,
            EvictionCause::Expired => &self.expired,
            EvictionCause::Replaced => &self.replaced,
        }
    }

    /// Total lookups served from the cache.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total lookups that had to open.
    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Total successful opens.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    /// Total closes performed by the lifecycle guard (including failed ones).
    pub fn close_count(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }

    /// Total closes that returned an OS error.
    pub fn close_failure_count(&self) -> u64 {
        self.close_failures.load(Ordering::Relaxed)
    }

    /// Number of removals with the given cause.
    pub fn removal_count(&self, cause: EvictionCause) -> u64 {
        self.removal_counter(cause).load(Ordering::Relaxed)
    }

    /// Handles currently owned by the cache: opened and not yet removed.
    pub fn resident_count(&self) -> u64 {
        let removed = self.removal_count(EvictionCause::Invalidated)
            + self.removal_count(EvictionCause::SizeEvicted)
            + self.removal_count(EvictionCause::Expired)
            + self.removal_count(EvictionCause::Replaced);
        self.open_count().saturating_sub(removed)
    }

    /// Create a snapshot of current values.
    pub fn snapshot(&self) -> HandleCacheStatsSnapshot {
        HandleCacheStatsSnapshot {
            hits: self.hit_count(),
            misses: self.miss_count(),
            opens: self.open_count(),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            closes: self.close_count(),
            close_failures: self.close_failure_count(),
            invalidated: self.removal_count(EvictionCause::Invalidated),
            size_evicted: self.removal_count(EvictionCause::SizeEvicted),
            expired: self.removal_count(EvictionCause::Expired),
            replaced: self.removal_count(EvictionCause::Replaced),
        }
    }
}

/// A serializable snapshot of [`HandleCacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleCacheStatsSnapshot {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to open.
    pub misses: u64,
    /// Successful opens.
    pub opens: u64,
    /// Failed opens.
    pub open_failures: u64,
    /// Closes performed by the lifecycle guard.
    pub closes: u64,
    /// Closes that returned an OS error.
    pub close_failures: u64,
    /// Entries removed by explicit invalidation.
    pub invalidated: u64,
    /// Entries removed to stay within the size bound.
    pub size_evicted: u64,
    /// Entries removed after idling too long.
    pub expired: u64,
    /// Entries displaced by a replacing insert.
    pub replaced: u64,
}

impl HandleCacheStatsSnapshot {
    /// Compute the hit rate as a fraction (0.0 to 1.0).
    ///
    /// Returns 0.0 if no lookups have been performed.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total entries that left the cache for any cause.
    pub fn removals(&self) -> u64 {
        self.invalidated + self.size_evicted + self.expired + self.replaced
    }
}

/// Snapshot of both caches of a [`CachingFileSystem`](crate::CachingFileSystem).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemStatsSnapshot {
    /// Read cache counters.
    pub read: HandleCacheStatsSnapshot,
    /// Write cache counters.
    pub write: HandleCacheStatsSnapshot,
}

impl FileSystemStatsSnapshot {
    /// Handles opened across both caches.
    pub fn total_opens(&self) -> u64 {
        self.read.opens + self.write.opens
    }

    /// Handles closed across both caches.
    pub fn total_closes(&self) -> u64 {
        self.read.closes + self.write.closes
    }
}
