//! Scheduled-refresh primitive.
//!
//! A deliberately small warm-loading helper: re-run a loader on a fixed
//! interval and `put` the result through the orchestrator, keeping a hot
//! key fresh in both layers ahead of demand. Anything fancier (priority
//! queues, adaptive intervals) is out of scope for the engine.

use crate::bus::InvalidationBus;
use crate::error::Result;
use crate::guard::StampedeGuard;
use crate::orchestrator::MultiLevelCache;
use crate::remote::RemoteLayer;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handle to a running scheduled refresh. Dropping the handle does not
/// stop the task; call [`stop`](Self::stop).
pub struct RefreshTask {
    handle: JoinHandle<()>,
}

impl RefreshTask {
    /// Spawn a refresh loop for one key.
    ///
    /// Every `interval`, `loader` runs and its value is written through
    /// the cache (full put semantics, invalidation included). A loader
    /// returning `Ok(None)` leaves the cache untouched for that round;
    /// errors are logged and the loop continues.
    pub fn spawn<R, B, G, V, F, Fut>(
        cache: MultiLevelCache<R, B, G>,
        cache_name: impl Into<String>,
        key: impl Into<String>,
        interval: Duration,
        loader: F,
    ) -> Self
    where
        R: RemoteLayer + 'static,
        B: InvalidationBus + 'static,
        G: StampedeGuard + 'static,
        V: Serialize + Send + Sync + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>>> + Send + 'static,
    {
        let cache_name = cache_name.into();
        let key = key.into();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so the initial
            // refresh happens one interval after spawn.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match loader().await {
                    Ok(Some(value)) => {
                        if let Err(e) = cache.put(&cache_name, &key, &value).await {
                            warn!(
                                "⚠ Scheduled refresh put failed for {}:{}: {}",
                                cache_name, key, e
                            );
                        } else {
                            debug!("✓ Refreshed {}:{}", cache_name, key);
                        }
                    }
                    Ok(None) => {
                        debug!(
                            "Scheduled refresh for {}:{} returned absent, skipping",
                            cache_name, key
                        );
                    }
                    Err(e) => {
                        warn!(
                            "⚠ Scheduled refresh loader failed for {}:{}: {}",
                            cache_name, key, e
                        );
                    }
                }
            }
        });

        RefreshTask { handle }
    }

    /// Stop the refresh loop.
    pub fn stop(self) {
        self.handle.abort();
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}
