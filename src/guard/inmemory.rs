//! In-process stampede guard over shared lease entries.
//!
//! Clones share the lease table, so several orchestrators in one process
//! contend exactly like nodes sharing a distributed lock. Used by tests
//! and L1-only deployments.

use super::{StampedeGuard, RETRY_INTERVAL};
use crate::key::KeyBuilder;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Lease {
    expires_at: Instant,
}

impl Lease {
    fn new(lease: Duration) -> Self {
        Lease {
            expires_at: Instant::now() + lease,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Lease-table stampede guard.
#[derive(Clone)]
pub struct InMemoryGuard {
    keys: KeyBuilder,
    leases: Arc<DashMap<String, Lease>>,
}

impl InMemoryGuard {
    pub fn new() -> Self {
        InMemoryGuard {
            keys: KeyBuilder::default(),
            leases: Arc::new(DashMap::new()),
        }
    }

    pub fn with_keys(keys: KeyBuilder) -> Self {
        InMemoryGuard {
            keys,
            leases: Arc::new(DashMap::new()),
        }
    }

    /// One non-blocking acquisition attempt.
    fn try_once(&self, lock_key: &str, lease: Duration) -> bool {
        match self.leases.entry(lock_key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(Lease::new(lease));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Lease::new(lease));
                true
            }
        }
    }
}

impl Default for InMemoryGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl StampedeGuard for InMemoryGuard {
    async fn try_acquire(
        &self,
        cache_name: &str,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> bool {
        let lock_key = self.keys.lock(cache_name, key);
        let deadline = Instant::now() + wait;

        loop {
            if self.try_once(&lock_key, lease) {
                debug!("✓ Guard ACQUIRE {}", lock_key);
                return true;
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
        self.leases.remove(&lock_key);
        debug!("✓ Guard RELEASE {}", lock_key);
    }
}
