//! Cache key management utilities.

/// Default key prefix when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "tiercache";

/// Builder for namespaced cache and lock keys.
///
/// All keys handed to the remote layer and the stampede guard go through
/// this builder so every node in a deployment agrees on the layout:
///
/// ```text
/// entry:  {prefix}:{cacheName}:{key}
/// lock:   {prefix}:lock:{cacheName}:{key}
/// ```
#[derive(Clone, Debug)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        KeyBuilder {
            prefix: prefix.into(),
        }
    }

    /// Build the full remote-layer key for an entry.
    pub fn entry(&self, cache_name: &str, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, cache_name, key)
    }

    /// Build the common prefix of every entry under a cache name.
    ///
    /// Used for remote-layer `clear(cacheName)` (prefix deletion).
    pub fn cache_prefix(&self, cache_name: &str) -> String {
        format!("{}:{}:", self.prefix, cache_name)
    }

    /// Build the stampede-guard lock key for an entry.
    pub fn lock(&self, cache_name: &str, key: &str) -> String {
        format!("{}:lock:{}:{}", self.prefix, cache_name, key)
    }

    /// Parse a composite key into parts.
    pub fn parse(key: &str) -> Vec<&str> {
        key.split(':').collect()
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        KeyBuilder::new(DEFAULT_KEY_PREFIX)
    }
}
