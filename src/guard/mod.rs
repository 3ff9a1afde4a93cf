//! Stampede guard: cluster-wide single-flight load protection.
//!
//! Before running a loader for a missing key, the orchestrator acquires a
//! per-`(cacheName, key)` mutual-exclusion lease. At most one loader per
//! key runs cluster-wide; everyone else re-checks L2 (the winner has
//! usually populated it) or falls back per policy.
//!
//! The guard serializes **loader execution only** - reads never touch it.
//!
//! Two time bounds keep the mechanism safe:
//! - **lease** bounds the worst-case hold if a lock holder crashes
//! - **wait** bounds how long a follower blocks before its fallback
//!
//! Acquisition failure is not an error: `try_acquire` returns `false` and
//! the caller applies the configured fallback policy.

use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryGuard;
#[cfg(feature = "redis")]
pub use redis::RedisGuard;

/// Interval between acquisition attempts while waiting for a lease.
pub(crate) const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Distributed mutual-exclusion primitive limiting concurrent loader
/// execution to one per key, cluster-wide.
#[allow(async_fn_in_trait)]
pub trait StampedeGuard: Send + Sync + Clone {
    /// Try to acquire the lease for `(cache_name, key)`.
    ///
    /// Blocks up to `wait`; the lease auto-expires after `lease`.
    /// Never errors: transport failures degrade to `false` (logged at
    /// warn) and the caller's fallback policy applies.
    async fn try_acquire(
        &self,
        cache_name: &str,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> bool;

    /// Release a previously acquired lease.
    ///
    /// Only the acquisition that took the lease releases it; releasing
    /// after lease expiry (or without holding it) is a no-op.
    async fn release(&self, cache_name: &str, key: &str);
}
