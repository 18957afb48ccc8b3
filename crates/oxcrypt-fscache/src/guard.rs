//! Lifecycle guard: the single place cached handles are closed.
//!
//! Every [`HandleCache`](crate::HandleCache) registers a [`LifecycleGuard`] as
//! its moka eviction listener. moka invokes the listener exactly once per
//! entry that leaves the cache, whatever removed it (explicit invalidation,
//! the size bound, idle expiry or a replacing insert), so routing all closes
//! through here gives exactly-once release.
//!
//! Close failures are logged and counted, never propagated: the call that
//! triggered the removal may be an unrelated open that merely pushed the
//! cache over its size bound.

use std::fmt;
use std::sync::Arc;

use moka::notification::RemovalCause;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::handle::CacheableHandle;
use crate::stats::HandleCacheStats;

/// Why an entry left a handle cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionCause {
    /// Removed by an explicit `invalidate`.
    Invalidated,
    /// Evicted to keep the cache within its size bound.
    SizeEvicted,
    /// Evicted after not being accessed for the idle expiration.
    Expired,
    /// Overwritten by a new value for the same key.
    Replaced,
}

impl EvictionCause {
    /// Short name used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionCause::Invalidated => "invalidated",
            EvictionCause::SizeEvicted => "size_evicted",
            EvictionCause::Expired => "expired",
            EvictionCause::Replaced => "replaced",
        }
    }
}

impl fmt::Display for EvictionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RemovalCause> for EvictionCause {
    fn from(cause: RemovalCause) -> Self {
        match cause {
            RemovalCause::Explicit => EvictionCause::Invalidated,
            RemovalCause::Size => EvictionCause::SizeEvicted,
            RemovalCause::Expired => EvictionCause::Expired,
            RemovalCause::Replaced => EvictionCause::Replaced,
        }
    }
}

/// What to do with a handle displaced by [`EvictionCause::Replaced`].
///
/// The caches only insert through get-or-open, so replacement does not occur
/// through the public API. The policy makes the outcome explicit should a
/// replacing path ever be added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacePolicy {
    /// Close the displaced handle like any other removal.
    #[default]
    Close,
    /// Leave the displaced handle open; whoever replaced it owns it now.
    Retain,
}

/// What the guard did with a departing handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The handle was closed.
    Closed,
    /// Closing failed; the failure was logged and counted.
    CloseFailed,
    /// The handle was left open (`Replaced` under [`ReplacePolicy::Retain`]).
    Retained,
}

/// Removal hook shared by a cache and its eviction listener.
#[derive(Debug, Clone)]
pub struct LifecycleGuard {
    cache: &'static str,
    replace_policy: ReplacePolicy,
    stats: Arc<HandleCacheStats>,
}

impl LifecycleGuard {
    /// Create a guard for the cache named `cache`.
    pub fn new(
        cache: &'static str,
        replace_policy: ReplacePolicy,
        stats: Arc<HandleCacheStats>,
    ) -> Self {
        Self {
            cache,
            replace_policy,
            stats,
        }
    }

    /// Handle an entry leaving the cache.
    pub fn on_removal<H: CacheableHandle>(
        &self,
        key: &str,
        handle: &H,
        cause: EvictionCause,
    ) -> RemovalOutcome {
        self.stats.record_removal(cause);

        if cause == EvictionCause::Replaced && self.replace_policy == ReplacePolicy::Retain {
            warn!(
                cache = self.cache,
                path = key,
                "Replaced file handle left open; ownership moved to the replacing caller"
            );
            return RemovalOutcome::Retained;
        }

        self.stats.record_close();
        match handle.close() {
            Ok(()) => {
                info!(cache = self.cache, path = key, cause = %cause, "Closed cached file handle");
                RemovalOutcome::Closed
            }
            Err(e) => {
                self.stats.record_close_failure();
                warn!(
                    cache = self.cache,
                    path = key,
                    cause = %cause,
                    error = %e,
                    "Error while closing cached file handle"
                );
                RemovalOutcome::CloseFailed
            }
        }
    }

    /// Adapter with the shape of a moka eviction listener.
    pub(crate) fn on_moka_removal<H: CacheableHandle>(
        &self,
        key: &str,
        handle: &H,
        cause: RemovalCause,
    ) {
        let outcome = self.on_removal(key, handle, cause.into());
        debug!(cache = self.cache, path = key, ?outcome, "Handle left cache");
    }
}
