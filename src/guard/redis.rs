//! Redis-backed stampede guard.
//!
//! Acquisition is `SET lock_key token NX PX lease` polled until the wait
//! budget runs out. Release is a compare-and-delete script, so a node that
//! outlived its lease can never release the next holder's lock.

use super::{StampedeGuard, RETRY_INTERVAL};
use crate::key::KeyBuilder;
use dashmap::DashMap;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Release only if the stored token is ours.
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// Distributed stampede guard over Redis.
#[derive(Clone)]
pub struct RedisGuard {
    pool: Pool,
    keys: KeyBuilder,
    /// Tokens for leases this process currently holds.
    held: Arc<DashMap<String, String>>,
}

impl RedisGuard {
    /// Create a guard from a connection string.
    ///
    /// # Errors
    /// Returns `Err` if pool creation fails.
    pub async fn from_connection_string(
        conn_str: &str,
        keys: KeyBuilder,
    ) -> crate::error::Result<Self> {
        let cfg = PoolConfig::from_url(conn_str);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            crate::error::Error::ConfigError(format!("Failed to create guard pool: {}", e))
        })?;

        info!("✓ Redis stampede guard initialized");
        Ok(RedisGuard {
            pool,
            keys,
            held: Arc::new(DashMap::new()),
        })
    }

    /// Build a guard on an existing pool (shared with the remote layer).
    pub fn on_pool(pool: Pool, keys: KeyBuilder) -> Self {
        RedisGuard {
            pool,
            keys,
            held: Arc::new(DashMap::new()),
        }
    }

    async fn try_once(&self, lock_key: &str, token: &str, lease: Duration) -> Option<bool> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("⚠ Guard connection failed for {}: {}", lock_key, e);
                return None;
            }
        };

        let result: Result<Option<String>, _> = deadpool_redis::redis::cmd("SET")
            .arg(lock_key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis().max(1) as u64)
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(reply) => Some(reply.is_some()),
            Err(e) => {
                warn!("⚠ Guard SET NX failed for {}: {}", lock_key, e);
                None
            }
        }
    }
}

impl StampedeGuard for RedisGuard {
    async fn try_acquire(
        &self,
        cache_name: &str,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> bool {
        let lock_key = self.keys.lock(cache_name, key);
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait;

        loop {
            match self.try_once(&lock_key, &token, lease).await {
                Some(true) => {
                    self.held.insert(lock_key.clone(), token);
                    debug!("✓ Guard ACQUIRE {}", lock_key);
                    return true;
                }
                // Transport failure: degrade to "not acquired" rather than
                // surface an error; the caller's fallback policy applies.
                None => return false,
                Some(false) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("Guard acquisition timed out for {}", lock_key);
                return false;
            }
            tokio::time::sleep(RETRY_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn release(&self, cache_name: &str, key: &str) {
        let lock_key = self.keys.lock(cache_name, key);
        let Some((_, token)) = self.held.remove(&lock_key) else {
            return;
        };

        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                // The lease will expire on its own; losing the early
                // release only delays followers up to the lease time.
                warn!("⚠ Guard release connection failed for {}: {}", lock_key, e);
                return;
            }
        };

        let released: Result<i64, _> = deadpool_redis::redis::Script::new(RELEASE_SCRIPT)
            .key(&lock_key)
            .arg(&token)
            .invoke_async(&mut *conn)
            .await;

        match released {
            Ok(1) => debug!("✓ Guard RELEASE {}", lock_key),
            Ok(_) => debug!("Guard lease for {} already expired", lock_key),
            Err(e) => warn!("⚠ Guard release failed for {}: {}", lock_key, e),
        }
    }
}
