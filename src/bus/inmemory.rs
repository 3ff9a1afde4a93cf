//! In-process invalidation bus over tokio broadcast channels.
//!
//! Used by tests and single-process deployments. Clones share topics, so
//! several orchestrators in one process can form a miniature cluster:
//! each node publishes to and subscribes from the same shared bus, exactly
//! like a real deployment sharing one Redis topic.

use super::{InvalidationBus, InvalidationHandler, InvalidationMessage};
use crate::error::Result;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of each topic's broadcast channel. Slow subscribers that fall
/// further behind than this lose messages (and log a warning) rather than
/// backpressuring publishers.
const TOPIC_CAPACITY: usize = 1024;

/// In-memory pub/sub channel carrying JSON-encoded messages.
///
/// Payloads travel as the same JSON the wire transport would carry, so
/// serialization bugs surface in tests too.
#[derive(Clone)]
pub struct InMemoryBus {
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        InMemoryBus {
            topics: Arc::new(DashMap::new()),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationBus for InMemoryBus {
    async fn publish(&self, topic: &str, message: &InvalidationMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        // A send error only means there are no subscribers yet; the
        // message is fire-and-forget either way.
        let receivers = self.sender(topic).send(payload).unwrap_or(0);
        debug!(
            "✓ Bus PUBLISH {} ({:?}) -> {} subscriber(s)",
            topic, message.kind, receivers
        );
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: InvalidationHandler) -> Result<()> {
        let mut rx = self.sender(topic).subscribe();
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => match serde_json::from_str::<InvalidationMessage>(&payload) {
                        Ok(message) => handler(message),
                        Err(e) => {
                            warn!("⚠ Dropping malformed invalidation payload on {}: {}", topic, e);
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(
                            "⚠ Invalidation subscriber lagged on {}, {} message(s) lost",
                            topic, missed
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Invalidation subscriber for {} stopped", topic);
        });

        Ok(())
    }
}
