//! Redis pub/sub invalidation bus.
//!
//! Publishes through a multiplexed connection manager; each subscription
//! runs on a dedicated pub/sub connection drained by a spawned task, so
//! the subscriber path never blocks the publish path on the same node.

use super::{InvalidationBus, InvalidationHandler, InvalidationMessage};
use crate::error::{Error, Result};
use futures::StreamExt;
use redis::aio::ConnectionManager;

/// Redis-backed invalidation bus.
///
/// One logical topic (Redis channel) per deployment; every node publishes
/// its own mutations and consumes everyone else's.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisBus {
    /// Connect the bus.
    ///
    /// # Errors
    /// Returns `Err` if the connection string is invalid or the initial
    /// connection cannot be established.
    pub async fn new(conn_str: &str) -> Result<Self> {
        let client = redis::Client::open(conn_str)
            .map_err(|e| Error::ConfigError(format!("Invalid Redis URL: {}", e)))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| Error::Bus(format!("Failed to connect publisher: {}", e)))?;

        info!("✓ Redis invalidation bus connected");
        Ok(RedisBus { client, publisher })
    }
}

impl InvalidationBus for RedisBus {
    async fn publish(&self, topic: &str, message: &InvalidationMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.publisher.clone();

        redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::Bus(format!("Redis PUBLISH failed on {}: {}", topic, e)))?;

        debug!("✓ Bus PUBLISH {} ({:?})", topic, message.kind);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: InvalidationHandler) -> Result<()> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::Bus(format!("Failed to open pub/sub connection: {}", e)))?;
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| Error::Bus(format!("Failed to subscribe to {}: {}", topic, e)))?;

        let topic = topic.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("⚠ Unreadable invalidation payload on {}: {}", topic, e);
                        continue;
                    }
                };
                match serde_json::from_str::<InvalidationMessage>(&payload) {
                    Ok(message) => handler(message),
                    Err(e) => {
                        warn!("⚠ Dropping malformed invalidation payload on {}: {}", topic, e);
                    }
                }
            }
            warn!("⚠ Invalidation subscription to {} ended", topic);
        });

        info!("✓ Subscribed to invalidation topic {}", topic);
        Ok(())
    }
}
