//! Per-cache-name configuration resolution.
//!
//! Callers address caches by name; each name resolves to an immutable
//! [`CacheSpecification`] through a deterministic three-tier merge:
//!
//! 1. exact-name override (`caches.{name}` in [`CacheSettings`])
//! 2. deployment defaults (the top-level `default_*` fields)
//! 3. hardcoded fallback (ttl = 10 min, 10,000 entries, no null values,
//!    local TTL ratio 0.8)
//!
//! Resolution is side-effect-free and memoized for the process lifetime;
//! [`SpecificationResolver::invalidate`] clears the memo on explicit
//! configuration reload.

use crate::error::{Error, Result};
use crate::key::DEFAULT_KEY_PREFIX;
use crate::ttl::{TtlStrategy, DEFAULT_LOCAL_TTL_RATIO};
use crate::value::require_not_blank;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Hardcoded fallback TTL (10 minutes).
pub const FALLBACK_TTL: Duration = Duration::from_secs(600);

/// Hardcoded fallback L1 capacity.
pub const FALLBACK_MAX_ENTRIES: u64 = 10_000;

/// Fallback policy applied when stampede-guard acquisition times out.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub enum GuardFallback {
    /// Run the loader locally without caching the result. Trades a
    /// duplicate backend load for availability.
    #[default]
    FailOpen,

    /// Retry acquisition once more with the given extended wait before
    /// falling open.
    WaitLonger(Duration),
}

/// Stampede-guard timing configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    /// How long a follower blocks waiting for the lock before the fallback
    /// policy applies.
    pub wait: Duration,

    /// Lease time bounding the worst-case hold if a lock holder crashes.
    pub lease: Duration,

    /// What to do when acquisition times out.
    pub fallback: GuardFallback,
}

impl Default for GuardSettings {
    fn default() -> Self {
        GuardSettings {
            wait: Duration::from_millis(500),
            lease: Duration::from_secs(10),
            fallback: GuardFallback::FailOpen,
        }
    }
}

/// Per-cache-name overrides. Unset fields fall through to the deployment
/// defaults.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheOverrides {
    pub ttl: Option<Duration>,
    pub max_entries: Option<u64>,
    pub allow_null_values: Option<bool>,
    pub local_ttl_ratio: Option<f64>,
}

/// Deployment-wide cache configuration surface.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Default remote (L2) TTL for caches without an override.
    pub default_ttl: Duration,

    /// Default L1 capacity for caches without an override.
    pub default_maximum_size: u64,

    /// Whether loaders returning "absent" produce negative-cache entries.
    pub allow_null_values: bool,

    /// Emit per-operation metrics through the logging metrics recorder.
    pub record_stats: bool,

    /// Namespace prefix for remote keys and lock keys.
    pub key_prefix: String,

    /// Stampede-guard timing and fallback policy.
    pub guard: GuardSettings,

    /// Per-cache-name overrides.
    pub caches: HashMap<String, CacheOverrides>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            default_ttl: FALLBACK_TTL,
            default_maximum_size: FALLBACK_MAX_ENTRIES,
            allow_null_values: false,
            record_stats: false,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            guard: GuardSettings::default(),
            caches: HashMap::new(),
        }
    }
}

/// Resolved, immutable configuration for one cache name.
#[derive(Clone, Debug)]
pub struct CacheSpecification {
    pub cache_name: String,
    /// Remote (L2) TTL.
    pub ttl: Duration,
    /// L1 capacity bound.
    pub max_entries: u64,
    /// Whether confirmed-absent lookups are cached as sentinels.
    pub allow_null_values: bool,
    /// L1 TTL derivation strategy.
    pub local_ttl: TtlStrategy,
}

impl CacheSpecification {
    /// Derive the L1 TTL for an entry written with the given remote TTL.
    pub fn local_ttl_for(&self, remote_ttl: Duration) -> Duration {
        self.local_ttl.local_ttl(remote_ttl)
    }
}

/// Resolves cache names to specifications, memoizing results.
#[derive(Debug, Default)]
pub struct SpecificationResolver {
    settings: CacheSettings,
    resolved: DashMap<String, CacheSpecification>,
}

impl SpecificationResolver {
    pub fn new(settings: CacheSettings) -> Self {
        SpecificationResolver {
            settings,
            resolved: DashMap::new(),
        }
    }

    /// Deployment settings this resolver was built from.
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Resolve the specification for a cache name.
    ///
    /// # Errors
    /// - `Error::InvalidArgument` for a blank cache name
    /// - `Error::ConfigError` for invalid override values (non-positive
    ///   TTL or capacity, ratio outside (0, 1])
    pub fn resolve(&self, cache_name: &str) -> Result<CacheSpecification> {
        require_not_blank(cache_name, "cacheName")?;

        if let Some(spec) = self.resolved.get(cache_name) {
            return Ok(spec.clone());
        }

        let spec = self.merge(cache_name)?;
        debug!(
            "Resolved cache specification: cacheName={}, ttl={:?}, maxEntries={}, localTtl={}",
            cache_name, spec.ttl, spec.max_entries, spec.local_ttl
        );
        self.resolved
            .insert(cache_name.to_string(), spec.clone());
        Ok(spec)
    }

    /// Drop all memoized specifications (explicit configuration reload).
    pub fn invalidate(&self) {
        self.resolved.clear();
        info!("Cleared resolved cache specifications");
    }

    fn merge(&self, cache_name: &str) -> Result<CacheSpecification> {
        let overrides = self.settings.caches.get(cache_name);

        let ttl = overrides
            .and_then(|o| o.ttl)
            .unwrap_or(self.settings.default_ttl);
        let max_entries = overrides
            .and_then(|o| o.max_entries)
            .unwrap_or(self.settings.default_maximum_size);
        let allow_null_values = overrides
            .and_then(|o| o.allow_null_values)
            .unwrap_or(self.settings.allow_null_values);
        let ratio = overrides
            .and_then(|o| o.local_ttl_ratio)
            .unwrap_or(DEFAULT_LOCAL_TTL_RATIO);

        if ttl.is_zero() {
            return Err(Error::ConfigError(format!(
                "ttl must be positive for cache '{}'",
                cache_name
            )));
        }
        if max_entries == 0 {
            return Err(Error::ConfigError(format!(
                "maxEntries must be positive for cache '{}'",
                cache_name
            )));
        }

        Ok(CacheSpecification {
            cache_name: cache_name.to_string(),
            ttl,
            max_entries,
            allow_null_values,
            local_ttl: TtlStrategy::fixed_ratio(ratio)?,
        })
    }
}
