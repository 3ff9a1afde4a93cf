//! L1 TTL derivation strategies.
//!
//! The local (L1) TTL is derived from the remote (L2) TTL so that any
//! single node's staleness window after a remote-only update by another
//! node stays bounded: L1 must expire no later than L2.
//!
//! # The Three Strategies
//!
//! ```
//! use tiercache::ttl::TtlStrategy;
//! use std::time::Duration;
//!
//! // 1. Fixed ratio - the default: L1 TTL = L2 TTL x 0.8
//! let _s = TtlStrategy::fixed_ratio(0.8).unwrap();
//!
//! // 2. Fixed duration - L1 TTL is constant regardless of L2 TTL
//! let _s = TtlStrategy::fixed_duration(Duration::from_secs(300)).unwrap();
//!
//! // 3. Independent - L1 TTL configured on its own; may outlive L2
//! let _s = TtlStrategy::independent(Duration::from_secs(300)).unwrap();
//! ```
//!
//! A ratio (rather than a fixed offset) keeps the policy scale-invariant
//! across cache names with very different TTLs: a 10-minute cache gets an
//! 8-minute L1 window, a 1-hour cache gets 48 minutes. Fixed-ratio is the
//! only strategy exercised by the conformance tests; the other two exist
//! for caches that need a constant or fully decoupled L1 window.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default L1/L2 TTL ratio.
pub const DEFAULT_LOCAL_TTL_RATIO: f64 = 0.8;

/// Floor for any derived TTL; a computed zero would mean "no expiry" to
/// some backends.
const MIN_TTL: Duration = Duration::from_millis(1);

/// Strategy deriving the local (L1) TTL from the remote (L2) TTL.
#[derive(Clone, Debug, PartialEq)]
pub enum TtlStrategy {
    /// `local = remote x ratio`, ratio in (0, 1].
    FixedRatio(f64),

    /// Constant L1 TTL, capped at the remote TTL so L1 never outlives L2.
    FixedDuration(Duration),

    /// Constant L1 TTL, independent of the remote TTL. L1 may outlive L2;
    /// callers opting in accept the wider staleness window.
    Independent(Duration),
}

impl TtlStrategy {
    /// Create a fixed-ratio strategy.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if `ratio` is not in (0, 1].
    pub fn fixed_ratio(ratio: f64) -> Result<Self> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(Error::ConfigError(format!(
                "localTtlRatio must be in (0, 1], got {}",
                ratio
            )));
        }
        Ok(TtlStrategy::FixedRatio(ratio))
    }

    /// Create a fixed-duration strategy.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if `duration` is zero.
    pub fn fixed_duration(duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(Error::ConfigError(
                "fixed local TTL must be positive".to_string(),
            ));
        }
        Ok(TtlStrategy::FixedDuration(duration))
    }

    /// Create an independent strategy.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if `duration` is zero.
    pub fn independent(duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(Error::ConfigError(
                "independent local TTL must be positive".to_string(),
            ));
        }
        Ok(TtlStrategy::Independent(duration))
    }

    /// Derive the L1 TTL from the given L2 TTL.
    ///
    /// Results floor at 1 ms so a short remote TTL never derives into
    /// "no expiry".
    pub fn local_ttl(&self, remote_ttl: Duration) -> Duration {
        let derived = match self {
            TtlStrategy::FixedRatio(ratio) => remote_ttl.mul_f64(*ratio),
            TtlStrategy::FixedDuration(d) => (*d).min(remote_ttl),
            TtlStrategy::Independent(d) => *d,
        };
        derived.max(MIN_TTL)
    }
}

impl Default for TtlStrategy {
    fn default() -> Self {
        TtlStrategy::FixedRatio(DEFAULT_LOCAL_TTL_RATIO)
    }
}

impl std::fmt::Display for TtlStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TtlStrategy::FixedRatio(r) => write!(f, "FixedRatio({})", r),
            TtlStrategy::FixedDuration(d) => write!(f, "FixedDuration({:?})", d),
            TtlStrategy::Independent(d) => write!(f, "Independent({:?})", d),
        }
    }
}
