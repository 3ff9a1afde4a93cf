//! Local (L1) cache layer: bounded, in-process, I/O-free.
//!
//! One bounded store per cache name, created on first write with the
//! capacity from the resolved [`CacheSpecification`]. Eviction under
//! capacity pressure is LRU-equivalent (moka's TinyLFU); TTL expiry is
//! enforced on read, so an expired entry is never returned even if the
//! store has not reclaimed it yet.
//!
//! This layer never performs I/O and never blocks on anything slower than
//! a shard lock - it is safe to call from any async context without
//! spawning.

use crate::error::Result;
use crate::spec::SpecificationResolver;
use crate::value::VersionedValue;
use dashmap::DashMap;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// L1 entry with optional expiration, checked on access.
#[derive(Clone)]
struct LocalEntry {
    value: VersionedValue,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn new(value: VersionedValue, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|d| Instant::now() + d);
        LocalEntry { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// Bounded in-process cache layer.
///
/// Cheap to clone; clones share the same stores.
#[derive(Clone)]
pub struct LocalLayer {
    resolver: Arc<SpecificationResolver>,
    stores: Arc<DashMap<String, Cache<String, LocalEntry>>>,
}

impl LocalLayer {
    pub fn new(resolver: Arc<SpecificationResolver>) -> Self {
        LocalLayer {
            resolver,
            stores: Arc::new(DashMap::new()),
        }
    }

    /// Retrieve an entry, honoring TTL.
    ///
    /// Returns `None` both for "never cached" and "expired"; the sentinel
    /// state travels inside the returned `VersionedValue`.
    pub fn get(&self, cache_name: &str, key: &str) -> Option<VersionedValue> {
        let store = self.stores.get(cache_name)?;
        let entry = store.get(key)?;
        if entry.is_expired() {
            store.invalidate(key);
            debug!("✓ L1 GET {}:{} -> EXPIRED", cache_name, key);
            return None;
        }
        debug!("✓ L1 GET {}:{} -> HIT", cache_name, key);
        Some(entry.value)
    }

    /// Store an entry with the given TTL.
    ///
    /// The store for `cache_name` is created on first write, bounded by the
    /// resolved `max_entries`.
    ///
    /// # Errors
    /// Returns `Err` if the cache name fails specification resolution.
    pub fn put(
        &self,
        cache_name: &str,
        key: &str,
        value: VersionedValue,
        ttl: Duration,
    ) -> Result<()> {
        let store = match self.stores.get(cache_name) {
            Some(store) => store,
            None => {
                let spec = self.resolver.resolve(cache_name)?;
                self.stores
                    .entry(cache_name.to_string())
                    .or_insert_with(|| {
                        debug!(
                            "Created L1 store for {} (capacity {})",
                            cache_name, spec.max_entries
                        );
                        Cache::builder().max_capacity(spec.max_entries).build()
                    })
                    .downgrade()
            }
        };

        store.insert(key.to_string(), LocalEntry::new(value, Some(ttl)));
        debug!("✓ L1 PUT {}:{} (TTL: {:?})", cache_name, key, ttl);
        Ok(())
    }

    /// Remove one entry. Returns whether an entry was present.
    pub fn evict(&self, cache_name: &str, key: &str) -> bool {
        if let Some(store) = self.stores.get(cache_name) {
            let existed = store.get(key).is_some();
            store.invalidate(key);
            debug!("✓ L1 EVICT {}:{}", cache_name, key);
            return existed;
        }
        false
    }

    /// Remove one entry only if its version is older than `version`.
    ///
    /// Used by the invalidation listener: a KEY message carrying a version
    /// must not drop a local entry that is already as new as the write that
    /// triggered the message.
    pub fn evict_if_older(&self, cache_name: &str, key: &str, version: u64) -> bool {
        if let Some(store) = self.stores.get(cache_name) {
            match store.get(key) {
                Some(entry) if entry.value.version >= version => {
                    debug!(
                        "Skip L1 invalidation {}:{} (local version {} >= incoming {})",
                        cache_name, key, entry.value.version, version
                    );
                    return false;
                }
                Some(_) => {
                    store.invalidate(key);
                    debug!("✓ L1 EVICT {}:{} (older than {})", cache_name, key, version);
                    return true;
                }
                None => return false,
            }
        }
        false
    }

    /// Drop every entry under a cache name.
    pub fn clear(&self, cache_name: &str) {
        if let Some(store) = self.stores.get(cache_name) {
            store.invalidate_all();
            debug!("✓ L1 CLEAR {}", cache_name);
        }
    }

    /// Drop every entry in every store.
    pub fn clear_all(&self) {
        for store in self.stores.iter() {
            store.invalidate_all();
        }
        warn!("⚠ L1 CLEAR_ALL executed - all local caches cleared!");
    }

    /// Current entry count for a cache name (post-maintenance; for
    /// diagnostics and tests).
    pub fn len(&self, cache_name: &str) -> u64 {
        match self.stores.get(cache_name) {
            Some(store) => {
                store.run_pending_tasks();
                store.entry_count()
            }
            None => 0,
        }
    }

    pub fn is_empty(&self, cache_name: &str) -> bool {
        self.len(cache_name) == 0
    }
}
