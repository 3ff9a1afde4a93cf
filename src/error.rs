//! Error types for the cache engine.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the multi-level cache engine.
///
/// All operations return `Result<T>` where `Result` is defined as
/// `std::result::Result<T, Error>`. The variants map onto the engine's
/// failure modes:
#[derive(Debug, Clone)]
pub enum Error {
    /// Invalid caller input: blank cache name, blank key, empty key set.
    ///
    /// Raised before either cache layer is touched. Callers should treat
    /// this as a programming error, not a transient condition.
    InvalidArgument(String),

    /// Serialization failed when encoding a value for cache storage.
    SerializationError(String),

    /// Deserialization failed when decoding a cached value.
    ///
    /// Indicates corrupted or malformed data in the cache.
    ///
    /// **Recovery:** the entry should be evicted and recomputed.
    DeserializationError(String),

    /// The remote (L2) layer is unavailable or returned an error.
    ///
    /// Common causes:
    /// - Connection lost or pool exhausted
    /// - Network timeout / partition
    /// - Backend protocol error
    ///
    /// **Recovery:** read paths degrade to L1-only; write paths report the
    /// degraded write without rolling back an applied L1 write.
    RemoteUnavailable(String),

    /// A caller-supplied loader failed during `get_or_load`.
    ///
    /// Loader failures propagate unchanged and are never cached, so a
    /// transient backend outage cannot poison the cache with a failure
    /// marker.
    Loader(String),

    /// Publishing or consuming an invalidation message failed.
    ///
    /// Fails only the single operation in progress, never the whole
    /// orchestrator.
    Bus(String),

    /// Configuration error during assembly or specification resolution.
    ///
    /// Common causes:
    /// - TTL ratio outside (0, 1]
    /// - Non-positive TTL or capacity
    /// - Invalid connection string
    ///
    /// **Recovery:** fix configuration and restart.
    ConfigError(String),

    /// Invalid cache entry: corrupted envelope or bad magic.
    ///
    /// Returned when the entry header is not a valid engine envelope.
    ///
    /// **Recovery:** evict the entry and recompute.
    InvalidCacheEntry(String),

    /// Schema version mismatch between code and cached data.
    ///
    /// Raised when `CURRENT_SCHEMA_VERSION` changed between deployments.
    ///
    /// **Recovery:** the entry is evicted and recomputed on next access.
    /// No action needed - this is expected during rolling upgrades.
    VersionMismatch {
        /// Expected schema version (from compiled code)
        expected: u32,
        /// Found schema version (from cached entry)
        found: u32,
    },

    /// Generic error with custom message.
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::RemoteUnavailable(msg) => write!(f, "Remote layer unavailable: {}", msg),
            Error::Loader(msg) => write!(f, "Loader error: {}", msg),
            Error::Bus(msg) => write!(f, "Invalidation bus error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::InvalidCacheEntry(msg) => write!(f, "Invalid cache entry: {}", msg),
            Error::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "Cache schema version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::Bus(e.to_string())
        } else if e.is_syntax() || e.is_data() || e.is_eof() {
            Error::DeserializationError(e.to_string())
        } else {
            Error::SerializationError(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::RemoteUnavailable(e.to_string())
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::RemoteUnavailable(format!("Redis error: {}", e))
    }
}
