//! Bounded, idle-expiring cache of open handles.
//!
//! [`HandleCache`] maps normalized path strings to shared handles. It is
//! backed by a Moka sync cache configured with:
//!
//! - an LRU eviction policy bounded by `max_size` entries
//! - `time_to_idle` expiry, so an entry not accessed for `idle_expiration` is
//!   never returned as a hit
//! - a [`LifecycleGuard`] as eviction listener, the only place handles are
//!   closed
//!
//! # Atomic get-or-open
//!
//! [`HandleCache::get_or_open`] uses Moka's per-key entry initializer rather
//! than a lookup followed by an insert. Concurrent callers for the same key
//! coalesce onto one opener invocation and all receive the same `Arc`.
//!
//! A miss also holds a striped lock for its key until the new handle is
//! inserted, and [`HandleCache::invalidate`] takes the same lock. An
//! invalidation that starts while an open is in flight therefore waits for
//! the insert and then removes it, instead of missing the entry and letting
//! a handle to a deleted file land in the cache afterwards.
//!
//! # Eviction timing
//!
//! After an insert the cache runs its pending maintenance on the calling
//! thread. A handle pushed out by the size bound is therefore closed before
//! the open that displaced it returns.
//!
//! # Tracing
//!
//! Enable the `cache-tracing` feature for debug spans on cache operations.

use std::fmt;
use std::hash::{BuildHasher, RandomState};
use std::io;
use std::sync::Arc;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::config::HandleCacheConfig;
use crate::error::unshare_io_error;
use crate::guard::LifecycleGuard;
use crate::handle::CacheableHandle;
use crate::stats::HandleCacheStats;

// Conditional tracing macros - no-op when feature is disabled
#[cfg(feature = "cache-tracing")]
macro_rules! cache_span {
    ($name:expr, $($field:tt)*) => {
        tracing::debug_span!($name, $($field)*).entered()
    };
}

#[cfg(not(feature = "cache-tracing"))]
macro_rules! cache_span {
    ($name:expr, $($field:tt)*) => {
        // No-op - returns a dummy span that compiles away
        tracing::Span::none()
    };
}

#[cfg(feature = "cache-tracing")]
macro_rules! cache_event {
    ($level:ident, $($arg:tt)*) => {
        tracing::$level!($($arg)*)
    };
}

#[cfg(not(feature = "cache-tracing"))]
macro_rules! cache_event {
    ($level:ident, $($arg:tt)*) => {};
}

/// Number of locks serializing misses against invalidation.
const KEY_LOCK_STRIPES: usize = 64;

/// Thread-safe bounded cache from path key to open handle.
///
/// # Example
///
/// ```
/// use oxcrypt_fscache::{HandleCache, HandleCacheConfig};
/// use oxcrypt_fscache::testing::MockHandle;
/// use std::time::Duration;
///
/// let cache: HandleCache<MockHandle> =
///     HandleCache::new("read", HandleCacheConfig::new(2, Duration::from_secs(60)));
///
/// let first = cache.get_or_open("/data/a", || Ok(MockHandle::new(1))).unwrap();
/// let again = cache.get_or_open("/data/a", || Ok(MockHandle::new(2))).unwrap();
/// assert_eq!(again.id(), 1);
///
/// cache.invalidate("/data/a");
/// assert_eq!(first.close_calls(), 1);
/// ```
pub struct HandleCache<H: CacheableHandle> {
    name: &'static str,
    config: HandleCacheConfig,
    inner: Cache<String, Arc<H>>,
    stats: Arc<HandleCacheStats>,
    key_locks: Box<[Mutex<()>]>,
    hasher: RandomState,
}

impl<H: CacheableHandle> HandleCache<H> {
    /// Create a cache. `name` labels log lines and stats ("read", "write").
    pub fn new(name: &'static str, config: HandleCacheConfig) -> Self {
        let stats = Arc::new(HandleCacheStats::new());
        let guard = LifecycleGuard::new(name, config.replace_policy, Arc::clone(&stats));

        let inner = Cache::builder()
            .name(name)
            .max_capacity(config.max_size)
            .time_to_idle(config.idle_expiration)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |key: Arc<String>, handle: Arc<H>, cause| {
                guard.on_moka_removal(&key, handle.as_ref(), cause);
            })
            .build();

        Self {
            name,
            config,
            inner,
            stats,
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn lock_key(&self, key: &str) -> MutexGuard<'_, ()> {
        // Truncation only narrows the stripe choice
        #[allow(clippy::cast_possible_truncation)]
        let index = self.hasher.hash_one(key) as usize % self.key_locks.len();
        self.key_locks[index].lock()
    }

    /// The label given at construction.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &HandleCacheConfig {
        &self.config
    }

    /// Counters for this cache.
    pub fn stats(&self) -> &Arc<HandleCacheStats> {
        &self.stats
    }

    /// Return the cached handle for `key`, or open, cache and return a new one.
    ///
    /// `opener` runs at most once per miss, even when several threads miss on
    /// the same key at the same time. Its error is returned unchanged and
    /// nothing is cached.
    pub fn get_or_open<F>(&self, key: &str, opener: F) -> io::Result<Arc<H>>
    where
        F: FnOnce() -> io::Result<H>,
    {
        let _span = cache_span!("handle_cache_get_or_open", cache = self.name, path = key);

        if let Some(handle) = self.inner.get(key) {
            cache_event!(debug, "cache hit");
            self.stats.record_hit();
            return Ok(handle);
        }

        // Held until the handle is inserted so invalidate() cannot run between
        // the open and the insert.
        let _key_lock = self.lock_key(key);
        let entry = self
            .inner
            .entry(key.to_owned())
            .or_try_insert_with(|| {
                cache_event!(debug, "cache miss, opening handle");
                self.stats.record_miss();
                match opener() {
                    Ok(handle) => {
                        self.stats.record_open();
                        Ok(Arc::new(handle))
                    }
                    Err(e) => {
                        self.stats.record_open_failure();
                        Err(e)
                    }
                }
            })
            .map_err(unshare_io_error)?;

        if entry.is_fresh() {
            // Enforce the size bound before handing the new handle out
            self.inner.run_pending_tasks();
        } else {
            cache_event!(debug, "cache hit after waiting on key lock");
            self.stats.record_hit();
        }

        Ok(entry.into_value())
    }

    /// Look up `key` without opening anything. Counts as an access.
    pub fn get(&self, key: &str) -> Option<Arc<H>> {
        self.inner.get(key)
    }

    /// Returns true if a live entry exists for `key`. Does not count as an access.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Remove the entry for `key`, closing its handle through the guard.
    ///
    /// Waits for an open of `key` that is already in flight and removes the
    /// handle it produced. A no-op if there is no entry.
    pub fn invalidate(&self, key: &str) {
        let _span = cache_span!("handle_cache_invalidate", cache = self.name, path = key);
        let _key_lock = self.lock_key(key);
        self.inner.invalidate(key);
        debug!(cache = self.name, path = key, "Invalidated cached handle");
    }

    /// Remove every entry, closing each handle through the guard.
    ///
    /// Entries inserted concurrently with this call may survive it.
    pub fn invalidate_all(&self) {
        let _span = cache_span!("handle_cache_invalidate_all", cache = self.name);
        // Per-key removal notifies the guard synchronously; moka's own
        // invalidate_all defers removal to later maintenance.
        let mut removed = 0usize;
        for (key, _) in self.inner.iter() {
            let _key_lock = self.lock_key(&key);
            self.inner.invalidate(key.as_str());
            removed += 1;
        }
        self.inner.run_pending_tasks();
        debug!(cache = self.name, removed, "Invalidated all cached handles");
    }

    /// Run pending size and idle evictions now.
    ///
    /// Moka performs this housekeeping lazily; call this to close idle
    /// handles promptly (e.g. from a periodic timer).
    pub fn run_maintenance(&self) {
        self.inner.run_pending_tasks();
    }

    /// Approximate number of resident entries.
    ///
    /// Exact after [`run_maintenance`](Self::run_maintenance).
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.entry_count() == 0
    }
}

impl<H: CacheableHandle> Drop for HandleCache<H> {
    /// Close every resident handle through the guard, so shutdown closes are
    /// logged and counted like any other removal.
    fn drop(&mut self) {
        self.invalidate_all();
    }
}

impl<H: CacheableHandle> fmt::Debug for HandleCache<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleCache")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("entries", &self.inner.entry_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{EvictionCause, ReplacePolicy};
    use crate::testing::MockHandle;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn cache(max_size: u64) -> HandleCache<MockHandle> {
        HandleCache::new("test", HandleCacheConfig::new(max_size, Duration::from_secs(60)))
    }

    #[test]
    fn test_hit_returns_same_handle() {
        let cache = cache(4);
        let opens = AtomicU64::new(0);
        let open = || {
            let id = opens.fetch_add(1, Ordering::SeqCst);
            Ok(MockHandle::new(id))
        };

        let first = cache.get_or_open("/a", open).unwrap();
        let second = cache.get_or_open("/a", open).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hit_count(), 1);
        assert_eq!(cache.stats().miss_count(), 1);
    }

    #[test]
    fn test_open_failure_propagates_and_caches_nothing() {
        let cache = cache(4);

        let err = cache
            .get_or_open("/missing", || Err(io::Error::from_raw_os_error(libc::ENOENT)))
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
        assert!(!cache.contains("/missing"));
        assert_eq!(cache.stats().snapshot().open_failures, 1);

        // The next call opens again rather than replaying the failure
        let handle = cache.get_or_open("/missing", || Ok(MockHandle::new(9))).unwrap();
        assert_eq!(handle.id(), 9);
    }

    #[test]
    fn test_invalidate_closes_exactly_once() {
        let cache = cache(4);
        let handle = cache.get_or_open("/a", || Ok(MockHandle::new(1))).unwrap();

        cache.invalidate("/a");
        cache.invalidate("/a");

        assert_eq!(handle.close_calls(), 1);
        assert!(!cache.contains("/a"));
        assert_eq!(cache.stats().removal_count(EvictionCause::Invalidated), 1);
    }

    #[test]
    fn test_invalidate_absent_is_noop() {
        let cache = cache(4);
        cache.invalidate("/never-opened");
        assert_eq!(cache.stats().close_count(), 0);
        assert_eq!(cache.stats().snapshot().removals(), 0);
    }

    #[test]
    fn test_reopen_after_invalidate_is_fresh() {
        let cache = cache(4);
        let old = cache.get_or_open("/a", || Ok(MockHandle::new(1))).unwrap();
        cache.invalidate("/a");
        let new = cache.get_or_open("/a", || Ok(MockHandle::new(2))).unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert!(!old.is_open());
        assert!(new.is_open());
    }

    #[test]
    fn test_size_eviction_is_lru() {
        let cache = cache(2);
        let a = cache.get_or_open("/a", || Ok(MockHandle::new(1))).unwrap();
        let b = cache.get_or_open("/b", || Ok(MockHandle::new(2))).unwrap();
        let c = cache.get_or_open("/c", || Ok(MockHandle::new(3))).unwrap();

        // Closed before the open of /c returned
        assert_eq!(a.close_calls(), 1);
        assert_eq!(b.close_calls(), 0);
        assert_eq!(c.close_calls(), 0);
        assert!(!cache.contains("/a"));
        assert_eq!(cache.stats().removal_count(EvictionCause::SizeEvicted), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_access_refreshes_lru_position() {
        let cache = cache(2);
        let a = cache.get_or_open("/a", || Ok(MockHandle::new(1))).unwrap();
        let b = cache.get_or_open("/b", || Ok(MockHandle::new(2))).unwrap();

        // Touch /a so /b becomes least recently used
        cache.get_or_open("/a", || Ok(MockHandle::new(99))).unwrap();
        cache.get_or_open("/c", || Ok(MockHandle::new(3))).unwrap();

        assert_eq!(a.close_calls(), 0);
        assert_eq!(b.close_calls(), 1);
        assert!(cache.contains("/a"));
        assert!(!cache.contains("/b"));
    }

    #[test]
    fn test_idle_expiry_forces_reopen() {
        let cache: HandleCache<MockHandle> =
            HandleCache::new("test", HandleCacheConfig::new(4, Duration::from_millis(50)));
        let old = cache.get_or_open("/a", || Ok(MockHandle::new(1))).unwrap();

        thread::sleep(Duration::from_millis(120));

        let new = cache.get_or_open("/a", || Ok(MockHandle::new(2))).unwrap();
        cache.run_maintenance();

        assert_eq!(new.id(), 2);
        assert_eq!(old.close_calls(), 1);
        assert!(new.is_open());
        assert_eq!(cache.stats().snapshot().removals(), 1);
        assert_eq!(cache.stats().open_count(), 2);
    }

    #[test]
    fn test_idle_entry_closed_by_maintenance() {
        let cache: HandleCache<MockHandle> =
            HandleCache::new("test", HandleCacheConfig::new(4, Duration::from_millis(30)));
        let handle = cache.get_or_open("/a", || Ok(MockHandle::new(1))).unwrap();

        thread::sleep(Duration::from_millis(100));
        assert!(cache.get("/a").is_none(), "expired entry must not be a hit");
        cache.run_maintenance();

        assert_eq!(handle.close_calls(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().removal_count(EvictionCause::Expired), 1);
    }

    #[test]
    fn test_concurrent_misses_open_once() {
        const THREADS: usize = 16;
        let cache = Arc::new(cache(8));
        let opens = Arc::new(AtomicU64::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let opens = Arc::clone(&opens);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_open("/shared", || {
                            let id = opens.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(MockHandle::new(id))
                        })
                        .unwrap()
                })
            })
            .collect();

        let handles: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[test]
    fn test_invalidate_waits_for_in_flight_open() {
        let cache = Arc::new(cache(8));
        let opening = Arc::new(Barrier::new(2));

        let opener = {
            let cache = Arc::clone(&cache);
            let opening = Arc::clone(&opening);
            thread::spawn(move || {
                cache
                    .get_or_open("/seg", || {
                        opening.wait();
                        thread::sleep(Duration::from_millis(150));
                        Ok(MockHandle::new(1))
                    })
                    .unwrap()
            })
        };

        // The open is now in progress; invalidation must not overtake it
        opening.wait();
        cache.invalidate("/seg");
        let handle = opener.join().unwrap();

        assert!(!cache.contains("/seg"));
        assert_eq!(handle.close_calls(), 1);
        assert_eq!(cache.stats().removal_count(EvictionCause::Invalidated), 1);

        let fresh = cache.get_or_open("/seg", || Ok(MockHandle::new(2))).unwrap();
        assert_eq!(fresh.id(), 2);
    }

    #[test]
    fn test_concurrent_distinct_keys() {
        let cache = Arc::new(cache(64));
        let workers: Vec<_> = (0..8u64)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for j in 0..4u64 {
                        let key = format!("/dir/{i}/{j}");
                        cache.get_or_open(&key, || Ok(MockHandle::new(i * 10 + j))).unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        cache.run_maintenance();
        assert_eq!(cache.len(), 32);
        assert_eq!(cache.stats().open_count(), 32);
        assert_eq!(cache.stats().close_count(), 0);
    }

    #[test]
    fn test_close_failure_not_propagated() {
        let cache = cache(1);
        let a = cache.get_or_open("/a", || Ok(MockHandle::failing_close(1))).unwrap();

        // Evicting /a fails to close it, but opening /b still succeeds
        let b = cache.get_or_open("/b", || Ok(MockHandle::new(2))).unwrap();

        assert_eq!(a.close_calls(), 1);
        assert!(b.is_open());
        assert_eq!(cache.stats().close_failure_count(), 1);
    }

    #[test]
    fn test_invalidate_all_closes_everything() {
        let cache = cache(8);
        let handles: Vec<_> = (0..5u64)
            .map(|i| cache.get_or_open(&format!("/f{i}"), || Ok(MockHandle::new(i))).unwrap())
            .collect();

        cache.invalidate_all();

        assert!(handles.iter().all(|h| h.close_calls() == 1));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_drop_closes_resident_handles() {
        let cache = cache(8);
        let handle = cache.get_or_open("/a", || Ok(MockHandle::new(1))).unwrap();
        drop(cache);
        assert_eq!(handle.close_calls(), 1);
    }

    #[test]
    fn test_config_and_name() {
        let config = HandleCacheConfig::new(3, Duration::from_secs(5))
            .with_replace_policy(ReplacePolicy::Retain);
        let cache: HandleCache<MockHandle> = HandleCache::new("write", config);
        assert_eq!(cache.name(), "write");
        assert_eq!(cache.config(), &config);
        assert!(format!("{cache:?}").contains("write"));
    }
}
