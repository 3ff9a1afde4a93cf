//! Postcard-based wire format for remote-layer entries.
//!
//! Everything written to the remote (L2) layer is a
//! [`VersionedValue`](crate::value::VersionedValue) wrapped in a versioned
//! envelope. The envelope makes corrupt or cross-deployment entries fail
//! loudly instead of decoding into garbage.
//!
//! # Format
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────┐
//! │  MAGIC (4 bytes)│VERSION (4 bytes)│POSTCARD PAYLOAD (N bytes)│
//! └─────────────────┴─────────────────┴──────────────────────────┘
//!   "TIER"              u32 (LE)           postcard::to_allocvec(T)
//! ```
//!
//! Caller payloads inside a `VersionedValue` are themselves plain postcard
//! bytes, produced by [`encode_payload`] / [`decode_payload`]. The envelope
//! wraps only the outer versioned entry, so the schema version guards the
//! engine's own wire shape, not the caller's types.
//!
//! # Safety Guarantees
//!
//! - **Deterministic:** the same entry always produces identical bytes
//! - **Validated:** magic and version checked on every deserialization
//! - **Versioned:** engine schema changes evict entries instead of
//!   silently misreading them

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Magic header for engine wire entries.
///
/// Any remote entry without this signature is rejected during
/// deserialization.
pub const CACHE_MAGIC: [u8; 4] = *b"TIER";

/// Current wire schema version.
///
/// **CRITICAL:** Increment when making breaking changes to
/// [`VersionedValue`](crate::value::VersionedValue) or
/// [`CacheState`](crate::value::CacheState). Entries written by an older
/// deployment are then evicted and recomputed rather than misdecoded.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Versioned envelope for remote-layer entries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEnvelope<T> {
    /// Magic header: must be b"TIER"
    pub magic: [u8; 4],
    /// Schema version: must match CURRENT_SCHEMA_VERSION
    pub version: u32,
    /// The enveloped entry
    pub payload: T,
}

impl<T> CacheEnvelope<T> {
    /// Create a new envelope with current magic and version.
    pub fn new(payload: T) -> Self {
        Self {
            magic: CACHE_MAGIC,
            version: CURRENT_SCHEMA_VERSION,
            payload,
        }
    }
}

/// Serialize an entry with envelope for remote storage.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn serialize_for_cache<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let envelope = CacheEnvelope::new(value);
    postcard::to_allocvec(&envelope).map_err(|e| {
        log::error!("Cache serialization failed: {}", e);
        Error::SerializationError(e.to_string())
    })
}

/// Deserialize an entry from remote storage with validation.
///
/// # Errors
///
/// - `Error::InvalidCacheEntry`: invalid magic header
/// - `Error::VersionMismatch`: wire schema version changed
/// - `Error::DeserializationError`: corrupted payload
pub fn deserialize_from_cache<'de, T: Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    let envelope: CacheEnvelope<T> = postcard::from_bytes(bytes).map_err(|e| {
        log::error!("Cache deserialization failed: {}", e);
        Error::DeserializationError(e.to_string())
    })?;

    if envelope.magic != CACHE_MAGIC {
        log::warn!(
            "Invalid cache entry: expected magic {:?}, got {:?}",
            CACHE_MAGIC,
            envelope.magic
        );
        return Err(Error::InvalidCacheEntry(format!(
            "Invalid magic: expected {:?}, got {:?}",
            CACHE_MAGIC, envelope.magic
        )));
    }

    if envelope.version != CURRENT_SCHEMA_VERSION {
        log::warn!(
            "Cache schema version mismatch: expected {}, got {}",
            CURRENT_SCHEMA_VERSION,
            envelope.version
        );
        return Err(Error::VersionMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: envelope.version,
        });
    }

    Ok(envelope.payload)
}

/// Encode a caller value into payload bytes.
///
/// # Errors
///
/// Returns `Error::SerializationError` if Postcard serialization fails.
pub fn encode_payload<V: Serialize>(value: &V) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| Error::SerializationError(e.to_string()))
}

/// Decode payload bytes back into a caller value.
///
/// # Errors
///
/// Returns `Error::DeserializationError` if the bytes do not decode as `V`.
pub fn decode_payload<V: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<V> {
    postcard::from_bytes(bytes).map_err(|e| Error::DeserializationError(e.to_string()))
}
