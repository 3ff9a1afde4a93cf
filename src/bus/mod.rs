//! Cross-node invalidation broadcast.
//!
//! Writers publish an [`InvalidationMessage`] after every mutating
//! operation; every other node consumes it and drops (or keeps, when its
//! local entry is newer) the matching L1 entries. Messages are fire-and-
//! forget: they are never persisted, and a lost message only widens
//! staleness to the L1 TTL window.
//!
//! # Wire shape
//!
//! One logical topic per deployment, JSON payloads:
//!
//! ```json
//! {"kind":"KEY","cacheName":"orders","key":"o-1",
//!  "originNodeId":"8f14...","emittedAtMillis":1733760000000,"version":42}
//! ```
//!
//! `version` is present only for KEY messages emitted by `put`; an
//! unversioned KEY message means "unconditionally drop".

use crate::error::Result;
use crate::value::now_millis;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod inmemory;
#[cfg(feature = "redis")]
pub mod redis;

pub use inmemory::InMemoryBus;
#[cfg(feature = "redis")]
pub use redis::RedisBus;

/// What an invalidation message applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvalidationKind {
    /// One entry.
    Key,
    /// Every entry under one cache name.
    Cache,
    /// Every local entry.
    All,
}

/// Invalidation event broadcast to every other node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationMessage {
    pub kind: InvalidationKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cache_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key: Option<String>,
    /// Emitting node; consumers ignore their own messages.
    pub origin_node_id: String,
    pub emitted_at_millis: i64,
    /// Version of the write that triggered the message (KEY kind only).
    /// Absent means "unconditionally drop".
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<u64>,
}

impl InvalidationMessage {
    /// Single-key unconditional invalidation (evict path).
    pub fn of_key(cache_name: &str, key: &str, node_id: &str) -> Self {
        InvalidationMessage {
            kind: InvalidationKind::Key,
            cache_name: Some(cache_name.to_string()),
            key: Some(key.to_string()),
            origin_node_id: node_id.to_string(),
            emitted_at_millis: now_millis(),
            version: None,
        }
    }

    /// Single-key invalidation carrying the new version (put path).
    pub fn of_key_versioned(cache_name: &str, key: &str, node_id: &str, version: u64) -> Self {
        InvalidationMessage {
            kind: InvalidationKind::Key,
            cache_name: Some(cache_name.to_string()),
            key: Some(key.to_string()),
            origin_node_id: node_id.to_string(),
            emitted_at_millis: now_millis(),
            version: Some(version),
        }
    }

    /// Whole-cache invalidation (clear path).
    pub fn of_cache(cache_name: &str, node_id: &str) -> Self {
        InvalidationMessage {
            kind: InvalidationKind::Cache,
            cache_name: Some(cache_name.to_string()),
            key: None,
            origin_node_id: node_id.to_string(),
            emitted_at_millis: now_millis(),
            version: None,
        }
    }

    /// Drop-everything invalidation.
    pub fn of_all(node_id: &str) -> Self {
        InvalidationMessage {
            kind: InvalidationKind::All,
            cache_name: None,
            key: None,
            origin_node_id: node_id.to_string(),
            emitted_at_millis: now_millis(),
            version: None,
        }
    }
}

/// Callback invoked for each received message.
///
/// Handlers run on the bus's own drain task, never on the publishing
/// path; they must stay non-blocking (L1 work only).
pub type InvalidationHandler = Arc<dyn Fn(InvalidationMessage) + Send + Sync>;

/// Publish/subscribe channel carrying invalidation messages.
#[allow(async_fn_in_trait)]
pub trait InvalidationBus: Send + Sync + Clone {
    /// Publish a message to a topic.
    ///
    /// # Errors
    /// Returns `Err` if the transport rejects the message; the failure is
    /// scoped to this operation only.
    fn publish(
        &self,
        topic: &str,
        message: &InvalidationMessage,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Subscribe a handler to a topic.
    ///
    /// The handler is driven by a background task owned by the bus;
    /// malformed payloads are logged and skipped.
    ///
    /// # Errors
    /// Returns `Err` if the subscription cannot be established.
    async fn subscribe(&self, topic: &str, handler: InvalidationHandler) -> Result<()>;
}
