//! Observability hooks for cache operations.
//!
//! Implement [`CacheMetrics`] to wire the engine into your monitoring
//! system:
//!
//! ```ignore
//! use tiercache::observability::{CacheMetrics, CacheLevel};
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _cache: &str, _level: CacheLevel, _duration: Duration) {
//!         // counter!("cache_hits", "level" => level.as_str()).inc();
//!     }
//!     // ... other hooks as needed
//! }
//! ```
//!
//! The default recorder is [`NoOpMetrics`]; with `record_stats` enabled the
//! builder installs [`LoggingMetrics`], which emits every event through the
//! `log` crate at debug level.

use std::time::Duration;

/// Which cache layer served an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheLevel {
    /// In-process bounded cache.
    Local,
    /// Shared remote cache.
    Remote,
}

impl CacheLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLevel::Local => "L1",
            CacheLevel::Remote => "L2",
        }
    }
}

/// Trait for cache metrics collection.
///
/// Every hook has a no-op default so implementations only override what
/// they report.
pub trait CacheMetrics: Send + Sync {
    /// A read was served by the given layer.
    fn record_hit(&self, _cache_name: &str, _level: CacheLevel, _duration: Duration) {}

    /// A read missed both layers.
    fn record_miss(&self, _cache_name: &str, _duration: Duration) {}

    /// A caller-supplied loader ran (single-flight winner or fail-open
    /// fallback).
    fn record_load(&self, _cache_name: &str, _duration: Duration) {}

    /// A value was written through both layers.
    fn record_put(&self, _cache_name: &str, _duration: Duration) {}

    /// An entry was evicted.
    fn record_evict(&self, _cache_name: &str) {}

    /// An invalidation message from another node was applied locally.
    fn record_invalidation(&self, _cache_name: &str) {}

    /// An operation failed.
    fn record_error(&self, _cache_name: &str, _error: &str) {}
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {}

/// Metrics recorder that reports through the `log` crate.
#[derive(Clone, Default)]
pub struct LoggingMetrics;

impl CacheMetrics for LoggingMetrics {
    fn record_hit(&self, cache_name: &str, level: CacheLevel, duration: Duration) {
        debug!(
            "Cache HIT [{}] {} took {:?}",
            level.as_str(),
            cache_name,
            duration
        );
    }

    fn record_miss(&self, cache_name: &str, duration: Duration) {
        debug!("Cache MISS {} took {:?}", cache_name, duration);
    }

    fn record_load(&self, cache_name: &str, duration: Duration) {
        debug!("Cache LOAD {} took {:?}", cache_name, duration);
    }

    fn record_put(&self, cache_name: &str, duration: Duration) {
        debug!("Cache PUT {} took {:?}", cache_name, duration);
    }

    fn record_evict(&self, cache_name: &str) {
        debug!("Cache EVICT {}", cache_name);
    }

    fn record_invalidation(&self, cache_name: &str) {
        debug!("Cache INVALIDATION applied for {}", cache_name);
    }

    fn record_error(&self, cache_name: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", cache_name, error);
    }
}
