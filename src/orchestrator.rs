//! Multi-level cache orchestrator.
//!
//! [`MultiLevelCache`] is the only type the rest of an application calls.
//! It composes the local layer, an optional remote layer, the invalidation
//! bus, and the stampede guard into the engine protocol:
//!
//! - **Reads**: L1 → L2 → backfill L1 with the derived TTL. A sentinel hit
//!   is a confirmed absence and stops the lookup. An L2 failure degrades
//!   the read to L1-only (logged at warn) - availability over consistency.
//! - **Loads**: true misses funnel through the stampede guard so one
//!   loader per key runs cluster-wide; results are written L2-first so a
//!   crash between the writes leaves L2 authoritative.
//! - **Writes**: fresh version stamp, L2 then L1, then a KEY invalidation
//!   carrying the version so other nodes drop stale L1 entries proactively
//!   instead of waiting out their TTL.
//! - **Invalidation receipt**: self-echoes are ignored; versioned messages
//!   drop the local entry only if it is older; unversioned messages drop
//!   unconditionally.
//!
//! Instances are assembled with [`MultiLevelCacheBuilder`]; deployments
//! without a shared store simply never attach a remote layer and keep the
//! whole protocol minus the cross-node parts.

use crate::bus::{InMemoryBus, InvalidationBus, InvalidationKind, InvalidationMessage};
use crate::error::{Error, Result};
use crate::guard::{InMemoryGuard, StampedeGuard};
use crate::key::KeyBuilder;
use crate::local::LocalLayer;
use crate::observability::{CacheLevel, CacheMetrics, LoggingMetrics, NoOpMetrics};
use crate::remote::{InMemoryRemote, RemoteLayer};
use crate::serialization::{decode_payload, deserialize_from_cache, encode_payload, serialize_for_cache};
use crate::spec::{CacheSettings, CacheSpecification, GuardFallback, SpecificationResolver};
use crate::value::{now_millis, require_not_blank, CacheState, VersionClock, VersionedValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long a failed remote layer stays benched before a read retries it.
const REMOTE_RETRY_AFTER: Duration = Duration::from_secs(30);

struct Inner<R, B, G> {
    node_id: String,
    topic: String,
    keys: KeyBuilder,
    resolver: Arc<SpecificationResolver>,
    local: LocalLayer,
    remote: Option<R>,
    bus: Option<B>,
    guard: G,
    clock: VersionClock,
    metrics: Box<dyn CacheMetrics>,
    remote_available: AtomicBool,
    last_remote_failure_ms: AtomicI64,
}

impl<R, B, G> Inner<R, B, G> {
    /// Whether the remote layer is configured and not currently benched.
    ///
    /// After a failure the layer is skipped for [`REMOTE_RETRY_AFTER`],
    /// then probed again.
    fn remote_usable(&self) -> bool {
        if self.remote.is_none() {
            return false;
        }
        if self.remote_available.load(Ordering::Relaxed) {
            return true;
        }
        let last = self.last_remote_failure_ms.load(Ordering::Relaxed);
        if now_millis() - last >= REMOTE_RETRY_AFTER.as_millis() as i64 {
            info!(
                "Attempting to recover remote layer after {:?}",
                REMOTE_RETRY_AFTER
            );
            self.remote_available.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    fn mark_remote_unavailable(&self, operation: &str, error: &Error) {
        self.remote_available.store(false, Ordering::Relaxed);
        self.last_remote_failure_ms
            .store(now_millis(), Ordering::Relaxed);
        warn!(
            "⚠ Remote layer unavailable during [{}], degraded to local only. \
             Will retry after {:?}. Error: {}",
            operation, REMOTE_RETRY_AFTER, error
        );
    }

    /// Apply an invalidation message from the bus to the local layer.
    fn apply_invalidation(&self, message: InvalidationMessage) {
        // Self-echo suppression: a node never reacts to its own writes.
        if message.origin_node_id == self.node_id {
            debug!("Ignoring own invalidation message (node {})", self.node_id);
            return;
        }

        match message.kind {
            InvalidationKind::Key => {
                let (Some(cache_name), Some(key)) = (&message.cache_name, &message.key) else {
                    debug!("Skipping KEY invalidation without cacheName/key");
                    return;
                };
                match message.version {
                    // No version: unconditional drop (evict path)
                    None => {
                        self.local.evict(cache_name, key);
                    }
                    // Versioned: drop only entries older than the write
                    Some(version) => {
                        self.local.evict_if_older(cache_name, key, version);
                    }
                }
                self.metrics.record_invalidation(cache_name);
            }
            InvalidationKind::Cache => {
                let Some(cache_name) = &message.cache_name else {
                    debug!("Skipping CACHE invalidation without cacheName");
                    return;
                };
                self.local.clear(cache_name);
                self.metrics.record_invalidation(cache_name);
            }
            InvalidationKind::All => {
                self.local.clear_all();
            }
        }
    }
}

/// The multi-level cache engine.
///
/// Cheap to clone (all clones share state); safe to call from any number
/// of concurrent tasks.
///
/// # Example
///
/// ```ignore
/// use tiercache::{MultiLevelCacheBuilder, remote::InMemoryRemote, bus::InMemoryBus};
///
/// let cache = MultiLevelCacheBuilder::new()
///     .remote(InMemoryRemote::new())
///     .bus(InMemoryBus::new())
///     .build()
///     .await?;
///
/// cache.put("orders", "o-1", &order).await?;
/// let hit: Option<Order> = cache.get("orders", "o-1").await?;
/// ```
pub struct MultiLevelCache<R = InMemoryRemote, B = InMemoryBus, G = InMemoryGuard>
where
    R: RemoteLayer,
    B: InvalidationBus,
    G: StampedeGuard,
{
    inner: Arc<Inner<R, B, G>>,
}

impl<R, B, G> Clone for MultiLevelCache<R, B, G>
where
    R: RemoteLayer,
    B: InvalidationBus,
    G: StampedeGuard,
{
    fn clone(&self) -> Self {
        MultiLevelCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, B, G> MultiLevelCache<R, B, G>
where
    R: RemoteLayer + 'static,
    B: InvalidationBus + 'static,
    G: StampedeGuard + 'static,
{
    /// This node's identity, tagged onto every published invalidation.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// The in-process (L1) layer.
    pub fn local(&self) -> &LocalLayer {
        &self.inner.local
    }

    /// The remote (L2) layer, if one is configured.
    pub fn remote(&self) -> Option<&R> {
        self.inner.remote.as_ref()
    }

    /// Read a value: L1, then L2 with L1 backfill.
    ///
    /// Returns `Ok(None)` for "no entry" and for a confirmed-absent
    /// sentinel alike; neither touches the backing source.
    ///
    /// # Errors
    /// - `Error::InvalidArgument` for blank names/keys
    /// - decode errors for corrupted entries
    pub async fn get<V: DeserializeOwned>(&self, cache_name: &str, key: &str) -> Result<Option<V>> {
        require_not_blank(cache_name, "cacheName")?;
        require_not_blank(key, "key")?;
        let spec = self.inner.resolver.resolve(cache_name)?;

        let start = Instant::now();
        match self.lookup(&spec, cache_name, key).await? {
            Some((entry, level)) => {
                self.inner.metrics.record_hit(cache_name, level, start.elapsed());
                self.decode(entry)
            }
            None => {
                self.inner.metrics.record_miss(cache_name, start.elapsed());
                Ok(None)
            }
        }
    }

    /// Read a value, running `loader` under stampede protection on a true
    /// miss.
    ///
    /// The loader runs at most once cluster-wide per miss window. A loader
    /// returning `Ok(None)` is a confirmed absence: with
    /// `allow_null_values` it is cached as a sentinel, stopping repeated
    /// backend lookups. Loader errors propagate unchanged and are never
    /// cached.
    ///
    /// # Errors
    /// Same as [`get`](Self::get), plus whatever the loader returns.
    pub async fn get_or_load<V, F, Fut>(
        &self,
        cache_name: &str,
        key: &str,
        loader: F,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>>>,
    {
        self.get_or_load_with_ttl(cache_name, key, None, loader).await
    }

    /// [`get_or_load`](Self::get_or_load) with a per-call TTL override for
    /// the remote entry.
    pub async fn get_or_load_with_ttl<V, F, Fut>(
        &self,
        cache_name: &str,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>>>,
    {
        require_not_blank(cache_name, "cacheName")?;
        require_not_blank(key, "key")?;
        let spec = self.inner.resolver.resolve(cache_name)?;

        let start = Instant::now();
        if let Some((entry, level)) = self.lookup(&spec, cache_name, key).await? {
            self.inner.metrics.record_hit(cache_name, level, start.elapsed());
            return self.decode(entry);
        }

        // True miss: serialize loader execution per key, cluster-wide.
        let guard_cfg = &self.inner.resolver.settings().guard;
        let mut acquired = self
            .inner
            .guard
            .try_acquire(cache_name, key, guard_cfg.wait, guard_cfg.lease)
            .await;

        if !acquired {
            if let GuardFallback::WaitLonger(extra) = &guard_cfg.fallback {
                acquired = self
                    .inner
                    .guard
                    .try_acquire(cache_name, key, *extra, guard_cfg.lease)
                    .await;
            }
        }

        if acquired {
            // Release on every exit path, including loader failure. A
            // caller dropped mid-load is covered by lease expiry.
            let result = self
                .load_and_store(&spec, cache_name, key, ttl, loader)
                .await;
            self.inner.guard.release(cache_name, key).await;
            return result;
        }

        // Fail open: the winner may have just populated L2.
        if let Some((entry, level)) = self.lookup(&spec, cache_name, key).await? {
            self.inner.metrics.record_hit(cache_name, level, start.elapsed());
            return self.decode(entry);
        }

        warn!(
            "⚠ Stampede guard unavailable for {}:{}, loading without caching",
            cache_name, key
        );
        let load_start = Instant::now();
        let loaded = loader().await?;
        self.inner
            .metrics
            .record_load(cache_name, load_start.elapsed());
        Ok(loaded)
    }

    /// Write a value through both layers and broadcast a versioned KEY
    /// invalidation.
    ///
    /// # Errors
    /// - `Error::InvalidArgument` for blank names/keys
    /// - `Error::SerializationError` if the value does not encode
    pub async fn put<V: Serialize>(&self, cache_name: &str, key: &str, value: &V) -> Result<()> {
        self.put_with_ttl(cache_name, key, value, None).await
    }

    /// [`put`](Self::put) with a per-call TTL override for the remote
    /// entry.
    pub async fn put_with_ttl<V: Serialize>(
        &self,
        cache_name: &str,
        key: &str,
        value: &V,
        ttl: Option<Duration>,
    ) -> Result<()> {
        require_not_blank(cache_name, "cacheName")?;
        require_not_blank(key, "key")?;
        let spec = self.inner.resolver.resolve(cache_name)?;

        let start = Instant::now();
        let payload = encode_payload(value)?;
        let entry = VersionedValue::wrap(payload, &self.inner.clock);
        let version = entry.version;

        self.store_both(&spec, cache_name, key, entry, ttl).await?;
        self.publish(InvalidationMessage::of_key_versioned(
            cache_name,
            key,
            &self.inner.node_id,
            version,
        ))
        .await;

        self.inner.metrics.record_put(cache_name, start.elapsed());
        Ok(())
    }

    /// Bulk-load entries (basic warm-load primitive).
    ///
    /// Per-entry `put` semantics: each key gets its own version stamp and
    /// invalidation.
    pub async fn put_all<V: Serialize>(
        &self,
        cache_name: &str,
        entries: impl IntoIterator<Item = (String, V)>,
    ) -> Result<()> {
        for (key, value) in entries {
            self.put(cache_name, &key, &value).await?;
        }
        Ok(())
    }

    /// Remove an entry from both layers and broadcast an unconditional
    /// KEY invalidation.
    ///
    /// Returns whether either layer held the entry.
    pub async fn evict(&self, cache_name: &str, key: &str) -> Result<bool> {
        require_not_blank(cache_name, "cacheName")?;
        require_not_blank(key, "key")?;

        let l1 = self.inner.local.evict(cache_name, key);
        let l2 = self.evict_remote(cache_name, key).await.unwrap_or_else(|e| {
            self.inner.mark_remote_unavailable("evict", &e);
            false
        });

        // No version: receivers drop unconditionally.
        self.publish(InvalidationMessage::of_key(
            cache_name,
            key,
            &self.inner.node_id,
        ))
        .await;

        self.inner.metrics.record_evict(cache_name);
        Ok(l1 || l2)
    }

    /// Remove every entry under a cache name from both layers and
    /// broadcast a CACHE invalidation.
    pub async fn clear(&self, cache_name: &str) -> Result<()> {
        require_not_blank(cache_name, "cacheName")?;

        self.inner.local.clear(cache_name);

        if self.inner.remote_usable() {
            if let Some(remote) = self.inner.remote.as_ref() {
                let prefix = self.inner.keys.cache_prefix(cache_name);
                if let Err(e) = remote.delete_prefix(&prefix).await {
                    self.inner.mark_remote_unavailable("clear", &e);
                }
            }
        }

        self.publish(InvalidationMessage::of_cache(
            cache_name,
            &self.inner.node_id,
        ))
        .await;

        info!("Cache [{}] cleared", cache_name);
        Ok(())
    }

    /// Batch read: L1 first, then one L2 round-trip for the misses, which
    /// are backfilled into L1. Sentinels are filtered from the result.
    pub async fn get_all<V: DeserializeOwned>(
        &self,
        cache_name: &str,
        keys: &[&str],
    ) -> Result<HashMap<String, V>> {
        require_not_blank(cache_name, "cacheName")?;
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let spec = self.inner.resolver.resolve(cache_name)?;

        let mut found: HashMap<String, VersionedValue> = HashMap::new();
        let mut misses: Vec<&str> = Vec::new();

        for key in keys {
            require_not_blank(key, "key")?;
            match self.inner.local.get(cache_name, key) {
                Some(entry) => {
                    found.insert((*key).to_string(), entry);
                }
                None => misses.push(*key),
            }
        }

        if !misses.is_empty() && self.inner.remote_usable() {
            if let Some(remote) = self.inner.remote.as_ref() {
                let full_keys: Vec<String> = misses
                    .iter()
                    .map(|k| self.inner.keys.entry(cache_name, k))
                    .collect();
                let refs: Vec<&str> = full_keys.iter().map(String::as_str).collect();

                match remote.mget(&refs).await {
                    Ok(values) => {
                        let local_ttl = spec.local_ttl_for(spec.ttl);
                        for (key, bytes) in misses.iter().zip(values) {
                            let Some(bytes) = bytes else { continue };
                            let entry: VersionedValue = deserialize_from_cache(&bytes)?;
                            self.inner
                                .local
                                .put(cache_name, key, entry.clone(), local_ttl)?;
                            found.insert((*key).to_string(), entry);
                        }
                    }
                    Err(e) => self.inner.mark_remote_unavailable("getAll", &e),
                }
            }
        }

        let mut out = HashMap::with_capacity(found.len());
        for (key, entry) in found {
            if let Some(value) = self.decode(entry)? {
                out.insert(key, value);
            }
        }
        Ok(out)
    }

    /// Remove an entry from the local layer only.
    pub fn evict_local(&self, cache_name: &str, key: &str) -> bool {
        self.inner.local.evict(cache_name, key)
    }

    /// Remove an entry from the remote layer only.
    ///
    /// # Errors
    /// Returns `Err` if the remote layer is unreachable.
    pub async fn evict_remote(&self, cache_name: &str, key: &str) -> Result<bool> {
        let Some(remote) = self.inner.remote.as_ref() else {
            return Ok(false);
        };
        let full_key = self.inner.keys.entry(cache_name, key);
        remote.delete(&full_key).await
    }

    /// Apply an invalidation message as if received from the bus.
    ///
    /// Normally driven by the subscription installed at build time; public
    /// for deployments wiring their own transport.
    pub fn handle_invalidation(&self, message: InvalidationMessage) {
        self.inner.apply_invalidation(message);
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// L1 → L2 read with L1 backfill. `None` means a true miss.
    async fn lookup(
        &self,
        spec: &CacheSpecification,
        cache_name: &str,
        key: &str,
    ) -> Result<Option<(VersionedValue, CacheLevel)>> {
        if let Some(entry) = self.inner.local.get(cache_name, key) {
            return Ok(Some((entry, CacheLevel::Local)));
        }

        if !self.inner.remote_usable() {
            return Ok(None);
        }
        let Some(remote) = self.inner.remote.as_ref() else {
            return Ok(None);
        };

        let full_key = self.inner.keys.entry(cache_name, key);
        match remote.get(&full_key).await {
            Ok(Some(bytes)) => {
                let entry: VersionedValue = deserialize_from_cache(&bytes)?;
                let local_ttl = spec.local_ttl_for(spec.ttl);
                self.inner
                    .local
                    .put(cache_name, key, entry.clone(), local_ttl)?;
                Ok(Some((entry, CacheLevel::Remote)))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                // Degrade to L1-only; the L1 lookup above already missed.
                self.inner.mark_remote_unavailable("get", &e);
                Ok(None)
            }
        }
    }

    /// Post-guard load: re-check L2, run the loader once, store the result
    /// (or the sentinel) L2-first.
    async fn load_and_store<V, F, Fut>(
        &self,
        spec: &CacheSpecification,
        cache_name: &str,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>>>,
    {
        // Another caller may have populated the cache while we waited.
        if let Some((entry, _)) = self.lookup(spec, cache_name, key).await? {
            return self.decode(entry);
        }

        let start = Instant::now();
        let loaded = loader().await?;
        self.inner.metrics.record_load(cache_name, start.elapsed());

        match &loaded {
            Some(value) => {
                let payload = encode_payload(value)?;
                let entry = VersionedValue::wrap(payload, &self.inner.clock);
                self.store_both(spec, cache_name, key, entry, ttl).await?;
            }
            None if spec.allow_null_values => {
                let entry = VersionedValue::absent(&self.inner.clock);
                self.store_both(spec, cache_name, key, entry, ttl).await?;
                debug!("Cached confirmed absence for {}:{}", cache_name, key);
            }
            None => {
                debug!(
                    "Loader returned absent for {}:{}, null caching disabled",
                    cache_name, key
                );
            }
        }

        Ok(loaded)
    }

    /// Write L2 then L1.
    ///
    /// The order matters: a crash between the writes leaves L2
    /// authoritative and other nodes consistent; only this node's L1 would
    /// be stale, bounded by its own TTL. A remote failure degrades the
    /// write to L1-only; the applied L1 write is never rolled back.
    async fn store_both(
        &self,
        spec: &CacheSpecification,
        cache_name: &str,
        key: &str,
        entry: VersionedValue,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let remote_ttl = ttl.unwrap_or(spec.ttl);

        if self.inner.remote_usable() {
            if let Some(remote) = self.inner.remote.as_ref() {
                let full_key = self.inner.keys.entry(cache_name, key);
                let bytes = serialize_for_cache(&entry)?;
                if let Err(e) = remote.set(&full_key, bytes, Some(remote_ttl)).await {
                    self.inner.mark_remote_unavailable("put", &e);
                }
            }
        }

        let local_ttl = spec.local_ttl_for(remote_ttl);
        self.inner.local.put(cache_name, key, entry, local_ttl)
    }

    /// Unwrap an entry into the caller's type; sentinel decodes to `None`.
    fn decode<V: DeserializeOwned>(&self, entry: VersionedValue) -> Result<Option<V>> {
        match entry.state {
            CacheState::Absent => Ok(None),
            CacheState::Value(bytes) => decode_payload(&bytes).map(Some),
        }
    }

    /// Fire-and-forget invalidation publish.
    ///
    /// Publish failures are logged and swallowed: the local write already
    /// happened and other nodes converge via their L1 TTL at worst.
    async fn publish(&self, message: InvalidationMessage) {
        let Some(bus) = self.inner.bus.as_ref() else {
            return;
        };
        if let Err(e) = bus.publish(&self.inner.topic, &message).await {
            warn!("⚠ Failed to publish invalidation message: {}", e);
            self.inner
                .metrics
                .record_error(message.cache_name.as_deref().unwrap_or("*"), &e.to_string());
        }
    }
}

/// Builder assembling a [`MultiLevelCache`] from explicitly chosen layer
/// implementations.
///
/// Starts fully in-memory; attach production implementations per
/// deployment:
///
/// ```ignore
/// let cache = MultiLevelCacheBuilder::new()
///     .settings(settings)
///     .remote(RedisRemote::new(redis_config).await?)
///     .bus(RedisBus::new("redis://cache:6379").await?)
///     .guard(RedisGuard::from_connection_string("redis://cache:6379", keys).await?)
///     .build()
///     .await?;
/// ```
pub struct MultiLevelCacheBuilder<R = InMemoryRemote, B = InMemoryBus, G = InMemoryGuard>
where
    R: RemoteLayer,
    B: InvalidationBus,
    G: StampedeGuard,
{
    settings: CacheSettings,
    remote: Option<R>,
    bus: Option<B>,
    guard: G,
    metrics: Option<Box<dyn CacheMetrics>>,
    node_id: Option<String>,
}

impl MultiLevelCacheBuilder<InMemoryRemote, InMemoryBus, InMemoryGuard> {
    /// Start a builder with default settings and no remote tier.
    pub fn new() -> Self {
        MultiLevelCacheBuilder {
            settings: CacheSettings::default(),
            remote: None,
            bus: None,
            guard: InMemoryGuard::new(),
            metrics: None,
            node_id: None,
        }
    }
}

impl Default for MultiLevelCacheBuilder<InMemoryRemote, InMemoryBus, InMemoryGuard> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, B, G> MultiLevelCacheBuilder<R, B, G>
where
    R: RemoteLayer + 'static,
    B: InvalidationBus + 'static,
    G: StampedeGuard + 'static,
{
    /// Deployment configuration (TTLs, capacities, guard policy).
    pub fn settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Attach the remote (L2) layer.
    pub fn remote<R2: RemoteLayer + 'static>(self, remote: R2) -> MultiLevelCacheBuilder<R2, B, G> {
        MultiLevelCacheBuilder {
            settings: self.settings,
            remote: Some(remote),
            bus: self.bus,
            guard: self.guard,
            metrics: self.metrics,
            node_id: self.node_id,
        }
    }

    /// Attach the invalidation bus.
    pub fn bus<B2: InvalidationBus + 'static>(self, bus: B2) -> MultiLevelCacheBuilder<R, B2, G> {
        MultiLevelCacheBuilder {
            settings: self.settings,
            remote: self.remote,
            bus: Some(bus),
            guard: self.guard,
            metrics: self.metrics,
            node_id: self.node_id,
        }
    }

    /// Replace the stampede guard.
    pub fn guard<G2: StampedeGuard + 'static>(self, guard: G2) -> MultiLevelCacheBuilder<R, B, G2> {
        MultiLevelCacheBuilder {
            settings: self.settings,
            remote: self.remote,
            bus: self.bus,
            guard,
            metrics: self.metrics,
            node_id: self.node_id,
        }
    }

    /// Install a custom metrics recorder.
    pub fn metrics(mut self, metrics: Box<dyn CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the generated node id (useful in tests).
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Assemble the cache and subscribe to the invalidation topic.
    ///
    /// # Errors
    /// Returns `Err` if the bus subscription cannot be established.
    pub async fn build(self) -> Result<MultiLevelCache<R, B, G>> {
        let node_id = self
            .node_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let topic = format!("{}:invalidation", self.settings.key_prefix);
        let keys = KeyBuilder::new(self.settings.key_prefix.clone());
        let record_stats = self.settings.record_stats;
        let resolver = Arc::new(SpecificationResolver::new(self.settings));

        let metrics = self.metrics.unwrap_or_else(|| {
            if record_stats {
                Box::new(LoggingMetrics)
            } else {
                Box::new(NoOpMetrics)
            }
        });

        let inner = Arc::new(Inner {
            node_id,
            topic,
            keys,
            local: LocalLayer::new(Arc::clone(&resolver)),
            resolver,
            remote: self.remote,
            bus: self.bus,
            guard: self.guard,
            clock: VersionClock::new(),
            metrics,
            remote_available: AtomicBool::new(true),
            last_remote_failure_ms: AtomicI64::new(0),
        });

        if let Some(bus) = inner.bus.as_ref() {
            let handler_inner = Arc::clone(&inner);
            bus.subscribe(
                &inner.topic,
                Arc::new(move |message| handler_inner.apply_invalidation(message)),
            )
            .await?;
        }

        if inner.remote.is_some() {
            info!(
                "Multi-level cache initialized: L1 + remote L2, nodeId: {}",
                inner.node_id
            );
        } else {
            info!(
                "Multi-level cache initialized: L1 only (no remote layer configured), nodeId: {}",
                inner.node_id
            );
        }

        Ok(MultiLevelCache { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::CacheOverrides;
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: String,
        total_cents: u64,
    }

    fn order(id: &str) -> Order {
        Order {
            id: id.to_string(),
            total_cents: 4200,
        }
    }

    async fn l1_only() -> MultiLevelCache {
        MultiLevelCacheBuilder::new()
            .build()
            .await
            .expect("Failed to build cache")
    }

    async fn with_remote(remote: InMemoryRemote) -> MultiLevelCache {
        MultiLevelCacheBuilder::new()
            .remote(remote)
            .build()
            .await
            .expect("Failed to build cache")
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = l1_only().await;

        cache
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");

        let got: Option<Order> = cache.get("orders", "o-1").await.expect("Failed to get");
        assert_eq!(got, Some(order("o-1")));
    }

    #[tokio::test]
    async fn test_get_miss_returns_none() {
        let cache = l1_only().await;
        let got: Option<Order> = cache.get("orders", "missing").await.expect("Failed to get");
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_blank_arguments_rejected() {
        let cache = l1_only().await;

        let result: Result<Option<Order>> = cache.get("", "k").await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));

        let result: Result<Option<Order>> = cache.get("orders", "  ").await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));

        assert!(matches!(
            cache.evict("orders", "").await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_hit_backfills_local() {
        let remote = InMemoryRemote::new();
        let writer = with_remote(remote.clone()).await;
        let reader = with_remote(remote).await;

        writer
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");

        // Reader has no L1 entry yet; the hit comes from L2
        let got: Option<Order> = reader.get("orders", "o-1").await.expect("Failed to get");
        assert_eq!(got, Some(order("o-1")));

        // ...and is now backfilled into the reader's L1
        assert!(reader.local().get("orders", "o-1").is_some());
    }

    #[tokio::test]
    async fn test_get_or_load_runs_loader_once() {
        let cache = l1_only().await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let got: Option<Order> = cache
                .get_or_load("orders", "o-1", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(order("o-1")))
                })
                .await
                .expect("Failed to get_or_load");
            assert_eq!(got, Some(order("o-1")));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_error_propagates_and_is_not_cached() {
        let cache = l1_only().await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let result: Result<Option<Order>> = cache
                .get_or_load("orders", "o-1", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Loader("backend down".to_string()))
                })
                .await;
            assert!(matches!(result, Err(Error::Loader(_))));
        }

        // A failure is never cached: both calls must reach the loader
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_negative_caching_when_nulls_allowed() {
        let mut settings = CacheSettings::default();
        settings.caches.insert(
            "orders".to_string(),
            CacheOverrides {
                allow_null_values: Some(true),
                ..CacheOverrides::default()
            },
        );
        let cache = MultiLevelCacheBuilder::new()
            .settings(settings)
            .build()
            .await
            .expect("Failed to build cache");

        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let got: Option<Order> = cache
                .get_or_load("orders", "missing", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .expect("Failed to get_or_load");
            assert_eq!(got, None);
        }

        // Sentinel absorbed the repeat lookups
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_absence_not_cached_when_nulls_disallowed() {
        let cache = l1_only().await;
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let got: Option<Order> = cache
                .get_or_load("orders", "missing", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .expect("Failed to get_or_load");
            assert_eq!(got, None);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evict_removes_both_layers() {
        let remote = InMemoryRemote::new();
        let cache = with_remote(remote.clone()).await;

        cache
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");
        assert_eq!(remote.len(), 1);

        assert!(cache.evict("orders", "o-1").await.expect("Failed to evict"));
        assert!(cache.local().get("orders", "o-1").is_none());
        assert_eq!(remote.len(), 0);

        assert!(!cache.evict("orders", "o-1").await.expect("Failed to evict"));
    }

    #[tokio::test]
    async fn test_clear_empties_cache_name() {
        let remote = InMemoryRemote::new();
        let cache = with_remote(remote.clone()).await;

        cache
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");
        cache
            .put("users", "u-1", &order("u-1"))
            .await
            .expect("Failed to put");

        cache.clear("orders").await.expect("Failed to clear");

        let gone: Option<Order> = cache.get("orders", "o-1").await.expect("Failed to get");
        assert_eq!(gone, None);
        let kept: Option<Order> = cache.get("users", "u-1").await.expect("Failed to get");
        assert!(kept.is_some());
    }

    #[tokio::test]
    async fn test_remote_failure_degrades_to_local() {
        let remote = InMemoryRemote::new();
        let cache = with_remote(remote.clone()).await;

        cache
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");

        // Partition the remote: the L1 copy still serves reads
        remote.set_unavailable(true);
        let got: Option<Order> = cache.get("orders", "o-1").await.expect("Failed to get");
        assert_eq!(got, Some(order("o-1")));

        // A key that never made it to L1 reads as a miss, not an error
        let miss: Option<Order> = cache.get("orders", "o-2").await.expect("Failed to get");
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn test_degraded_write_keeps_l1() {
        let remote = InMemoryRemote::new();
        let cache = with_remote(remote.clone()).await;

        remote.set_unavailable(true);
        cache
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Degraded put should not fail");

        // L1 applied even though L2 was down
        let got: Option<Order> = cache.get("orders", "o-1").await.expect("Failed to get");
        assert_eq!(got, Some(order("o-1")));
        assert_eq!(remote.len(), 0);
    }

    #[tokio::test]
    async fn test_get_all_merges_layers() {
        let remote = InMemoryRemote::new();
        let writer = with_remote(remote.clone()).await;
        let reader = with_remote(remote).await;

        writer
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");
        writer
            .put("orders", "o-2", &order("o-2"))
            .await
            .expect("Failed to put");

        // o-1 warmed into the reader's L1; o-2 only in L2
        let _: Option<Order> = reader.get("orders", "o-1").await.expect("Failed to get");

        let all: HashMap<String, Order> = reader
            .get_all("orders", &["o-1", "o-2", "o-3"])
            .await
            .expect("Failed to get_all");

        assert_eq!(all.len(), 2);
        assert_eq!(all.get("o-1"), Some(&order("o-1")));
        assert_eq!(all.get("o-2"), Some(&order("o-2")));
        assert!(!all.contains_key("o-3"));
    }

    #[tokio::test]
    async fn test_put_all_bulk_load() {
        let cache = l1_only().await;

        cache
            .put_all(
                "orders",
                vec![
                    ("o-1".to_string(), order("o-1")),
                    ("o-2".to_string(), order("o-2")),
                ],
            )
            .await
            .expect("Failed to put_all");

        let got: Option<Order> = cache.get("orders", "o-2").await.expect("Failed to get");
        assert_eq!(got, Some(order("o-2")));
    }

    #[tokio::test]
    async fn test_handle_invalidation_self_echo_ignored() {
        let cache = l1_only().await;
        cache
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");

        // A message from this very node must not evict its own write
        let msg = InvalidationMessage::of_key("orders", "o-1", cache.node_id());
        cache.handle_invalidation(msg);
        assert!(cache.local().get("orders", "o-1").is_some());

        // The same message from another node drops it
        let msg = InvalidationMessage::of_key("orders", "o-1", "other-node");
        cache.handle_invalidation(msg);
        assert!(cache.local().get("orders", "o-1").is_none());
    }

    #[tokio::test]
    async fn test_handle_invalidation_version_gate() {
        let cache = l1_only().await;
        cache
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");
        let local_version = cache
            .local()
            .get("orders", "o-1")
            .expect("Entry missing")
            .version;

        // Stale message (older version): entry survives
        cache.handle_invalidation(InvalidationMessage::of_key_versioned(
            "orders",
            "o-1",
            "other-node",
            local_version,
        ));
        assert!(cache.local().get("orders", "o-1").is_some());

        // Newer version: entry drops
        cache.handle_invalidation(InvalidationMessage::of_key_versioned(
            "orders",
            "o-1",
            "other-node",
            local_version + 1,
        ));
        assert!(cache.local().get("orders", "o-1").is_none());
    }

    #[tokio::test]
    async fn test_handle_invalidation_cache_and_all() {
        let cache = l1_only().await;
        cache
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");
        cache
            .put("users", "u-1", &order("u-1"))
            .await
            .expect("Failed to put");

        cache.handle_invalidation(InvalidationMessage::of_cache("orders", "other-node"));
        assert!(cache.local().get("orders", "o-1").is_none());
        assert!(cache.local().get("users", "u-1").is_some());

        cache.handle_invalidation(InvalidationMessage::of_all("other-node"));
        assert!(cache.local().get("users", "u-1").is_none());
    }

    #[tokio::test]
    async fn test_local_read_after_write_without_remote_call() {
        let remote = InMemoryRemote::new();
        let cache = with_remote(remote.clone()).await;

        cache
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");

        // Even with the remote partitioned, the node reads its own write
        remote.set_unavailable(true);
        let got: Option<Order> = cache.get("orders", "o-1").await.expect("Failed to get");
        assert_eq!(got, Some(order("o-1")));
    }

    #[tokio::test]
    async fn test_evict_local_and_remote_accessors() {
        let remote = InMemoryRemote::new();
        let cache = with_remote(remote.clone()).await;

        cache
            .put("orders", "o-1", &order("o-1"))
            .await
            .expect("Failed to put");

        assert!(cache.evict_local("orders", "o-1"));
        // Still present remotely
        assert!(cache
            .evict_remote("orders", "o-1")
            .await
            .expect("Failed to evict remote"));
        assert!(cache.remote().is_some());
    }
}
