//! In-memory remote layer (thread-safe, async).
//!
//! A process-local stand-in for the shared store: used by tests, local
//! development, and single-node deployments that still want the full
//! orchestrator protocol. Uses DashMap for lock-free concurrent access and
//! handles TTL expiration on access.

use super::RemoteLayer;
use crate::error::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Remote entry with optional expiration.
struct RemoteEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl RemoteEntry {
    fn new(data: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        RemoteEntry { data, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// Thread-safe in-memory remote layer.
///
/// Clones share the same store, so several orchestrators in one test
/// process can use one `InMemoryRemote` as their common L2 - the same
/// topology a real deployment has with a shared Redis.
///
/// # Example
///
/// ```no_run
/// use tiercache::remote::{InMemoryRemote, RemoteLayer};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let remote = InMemoryRemote::new();
///
///     remote.set("key1", b"value".to_vec(), None).await?;
///     assert!(remote.get("key1").await?.is_some());
///
///     remote.set("key2", b"expires".to_vec(), Some(Duration::from_secs(300))).await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct InMemoryRemote {
    store: Arc<DashMap<String, RemoteEntry>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryRemote {
    /// Create a new in-memory remote layer.
    pub fn new() -> Self {
        InMemoryRemote {
            store: Arc::new(DashMap::new()),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the current number of entries.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Simulate a partition: while unavailable, every operation returns
    /// `Error::RemoteUnavailable`. Used to exercise degrade paths.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(Error::RemoteUnavailable(
                "in-memory remote marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteLayer for InMemoryRemote {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_available()?;

        if let Some(entry) = self.store.get(key) {
            if !entry.is_expired() {
                debug!("✓ L2 GET {} -> HIT", key);
                return Ok(Some(entry.data.clone()));
            }
        }

        // Drop the expired entry if present
        self.store.remove_if(key, |_, entry| entry.is_expired());
        debug!("✓ L2 GET {} -> MISS", key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.check_available()?;

        self.store
            .insert(key.to_string(), RemoteEntry::new(value, ttl));
        debug!("✓ L2 SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_available()?;

        let removed = self.store.remove(key).is_some();
        debug!("✓ L2 DELETE {} (removed: {})", key, removed);
        Ok(removed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        self.check_available()?;

        let before = self.store.len();
        self.store.retain(|key, _| !key.starts_with(prefix));
        let removed = (before - self.store.len()) as u64;
        debug!("✓ L2 DELETE_PREFIX {} ({} entries)", prefix, removed);
        Ok(removed)
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<Vec<u8>>>> {
        self.check_available()?;

        let results = keys
            .iter()
            .map(|k| {
                self.store.get(*k).and_then(|entry| {
                    if entry.is_expired() {
                        None
                    } else {
                        Some(entry.data.clone())
                    }
                })
            })
            .collect();

        debug!("✓ L2 MGET {} keys", keys.len());
        Ok(results)
    }

    async fn health_check(&self) -> Result<bool> {
        self.check_available()?;
        Ok(true)
    }
}
