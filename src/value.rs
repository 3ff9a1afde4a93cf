//! Versioned cache values and the negative-cache sentinel.
//!
//! Every entry stored in either cache layer is a [`VersionedValue`]: the
//! caller's payload (or the confirmed-absent sentinel) stamped with a
//! cluster-orderable version and a wall-clock timestamp. Versions arbitrate
//! staleness between L1 and L2 and gate invalidation-message handling.
//!
//! # Version scheme
//!
//! ```text
//! version = (monotonic_nanos << 16) | (process_counter & 0xFFFF)
//! ```
//!
//! `monotonic_nanos` is nanoseconds since process start read from a
//! monotonic clock; the 16 low counter bits disambiguate up to 65,536
//! writes within one clock tick per process. Versions from one process are
//! strictly increasing; cross-process ties break by wall-clock ordering,
//! best-effort.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Number of low bits reserved for the per-process write counter.
const COUNTER_BITS: u32 = 16;

/// Cached payload state: a real value or the confirmed-absent sentinel.
///
/// `Absent` is a structural tag, not a magic value: detection is a variant
/// check (never equality against user data) and the tag survives
/// serialization and process boundaries. "No entry at all" is a third,
/// distinct state, represented as `Option::None` at the layer seams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheState {
    /// Serialized caller payload.
    Value(Vec<u8>),
    /// Looked up and confirmed absent; cached to stop repeated backend
    /// lookups for keys that do not exist.
    Absent,
}

/// A cached value stamped with a monotonic version and write timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    /// Payload or sentinel.
    pub state: CacheState,
    /// Cluster-orderable version, strictly increasing per process.
    pub version: u64,
    /// Wall-clock write time, used to break cross-process version ties.
    pub written_at_millis: i64,
}

impl VersionedValue {
    /// Wrap serialized payload bytes with a fresh version stamp.
    pub fn wrap(payload: Vec<u8>, clock: &VersionClock) -> Self {
        VersionedValue {
            state: CacheState::Value(payload),
            version: clock.stamp(),
            written_at_millis: now_millis(),
        }
    }

    /// Create a confirmed-absent entry with a fresh version stamp.
    pub fn absent(clock: &VersionClock) -> Self {
        VersionedValue {
            state: CacheState::Absent,
            version: clock.stamp(),
            written_at_millis: now_millis(),
        }
    }

    /// Whether this entry is the negative-cache sentinel.
    ///
    /// Tag check only - never compares against payload bytes, so user data
    /// can never collide with the sentinel.
    pub fn is_absent(&self) -> bool {
        matches!(self.state, CacheState::Absent)
    }

    /// Payload bytes, or `None` for the sentinel.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.state {
            CacheState::Value(bytes) => Some(bytes),
            CacheState::Absent => None,
        }
    }

    /// Compare versions, treating "no entry" as older than any real entry.
    ///
    /// Equal versions (possible across processes) fall back to wall-clock
    /// ordering, best-effort.
    pub fn is_newer_than(&self, other: Option<&VersionedValue>) -> bool {
        match other {
            None => true,
            Some(o) => {
                self.version > o.version
                    || (self.version == o.version && self.written_at_millis > o.written_at_millis)
            }
        }
    }
}

/// Process-local version stamper.
///
/// One instance is shared per orchestrator. `stamp()` is lock-free and safe
/// to call from any number of concurrent tasks.
#[derive(Debug)]
pub struct VersionClock {
    origin: Instant,
    counter: AtomicU64,
    last_issued: AtomicU64,
    ordering_degraded: AtomicBool,
}

impl VersionClock {
    pub fn new() -> Self {
        VersionClock {
            origin: Instant::now(),
            counter: AtomicU64::new(0),
            last_issued: AtomicU64::new(0),
            ordering_degraded: AtomicBool::new(false),
        }
    }

    /// Issue the next version.
    ///
    /// The raw stamp combines the monotonic reading with the low counter
    /// bits. A raw stamp that does not exceed the last issued version (clock
    /// anomaly, or counter wrap inside a single tick) falls back to
    /// `last + 1`: counter-only ordering, still strictly increasing.
    pub fn stamp(&self) -> u64 {
        let nanos = self.origin.elapsed().as_nanos() as u64;
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) & ((1 << COUNTER_BITS) - 1);
        let raw = (nanos << COUNTER_BITS) | seq;

        let mut prev = self.last_issued.load(Ordering::Relaxed);
        loop {
            let next = if raw > prev {
                raw
            } else {
                // raw < prev means the clock reading went backward; raw ==
                // prev is an ordinary counter collision within one tick.
                if raw < prev && !self.ordering_degraded.swap(true, Ordering::Relaxed) {
                    warn!(
                        "⚠ Version clock fell behind last issued version ({} < {}), \
                         degrading to counter-only ordering",
                        raw, prev
                    );
                }
                prev + 1
            };
            match self.last_issued.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => prev = observed,
            }
        }
    }
}

impl Default for VersionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Validate a cache name or key argument before touching either layer.
pub(crate) fn require_not_blank(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!(
            "{} must not be blank",
            what
        )));
    }
    Ok(())
}
