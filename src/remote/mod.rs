//! Remote (L2) cache layer abstractions.
//!
//! The remote layer is the shared, cross-node source of cache truth: a
//! key-value store with per-entry TTL reached over the network. The
//! orchestrator stores enveloped [`VersionedValue`](crate::value) bytes
//! here; this module only moves bytes.
//!
//! Failures are expected: callers on the read path treat any `Err` as a
//! degrade-to-L1 signal (logged at warn), never a hard failure.

use crate::error::Result;
use std::time::Duration;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryRemote;
#[cfg(feature = "redis")]
pub use redis::{RedisConfig, RedisRemote};

/// Trait for remote (L2) layer implementations.
///
/// **IMPORTANT:** All methods use `&self` to allow concurrent access.
/// Implementations should use interior mutability or external storage.
///
/// **ASYNC:** Every method is a suspension point and may block on network
/// I/O; no caller lock may span one of these calls.
#[allow(async_fn_in_trait)]
pub trait RemoteLayer: Send + Sync + Clone {
    /// Retrieve entry bytes by full key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - entry found
    /// - `Ok(None)` - no entry (distinct from the sentinel, which is a
    ///   stored entry)
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable; callers degrade to
    /// L1-only.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store entry bytes with optional TTL.
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Remove an entry. Returns whether an entry was removed.
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Backs `clear(cacheName)`. Returns the number of entries removed.
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Bulk get (optional optimization).
    ///
    /// Default implementation calls `get()` per key. Override for batch
    /// efficiency (e.g. Redis MGET).
    ///
    /// # Errors
    /// Returns `Err` if the store is unreachable.
    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.get(key).await?);
        }
        Ok(results)
    }

    /// Health check - verify the store is reachable.
    ///
    /// # Errors
    /// Returns `Err` if the store is not accessible.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
