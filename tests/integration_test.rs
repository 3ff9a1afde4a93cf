//! Integration tests for tiercache
//!
//! These tests verify the engine's cross-node consistency protocol by
//! assembling several orchestrators ("nodes") around shared in-memory
//! backends - the same topology a real deployment has around a shared
//! Redis: one remote layer, one invalidation topic, one lock space.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiercache::bus::InMemoryBus;
use tiercache::guard::InMemoryGuard;
use tiercache::remote::InMemoryRemote;
use tiercache::spec::{CacheOverrides, CacheSettings, GuardSettings};
use tiercache::{MultiLevelCache, MultiLevelCacheBuilder};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct Order {
    id: String,
    total_cents: u64,
}

fn order(id: &str) -> Order {
    Order {
        id: id.to_string(),
        total_cents: 4200,
    }
}

/// A miniature cluster: nodes share the remote layer, the invalidation
/// bus, and the lock space.
struct Cluster {
    remote: InMemoryRemote,
    bus: InMemoryBus,
    guard: InMemoryGuard,
    settings: CacheSettings,
}

impl Cluster {
    fn new(settings: CacheSettings) -> Self {
        Cluster {
            remote: InMemoryRemote::new(),
            bus: InMemoryBus::new(),
            guard: InMemoryGuard::new(),
            settings,
        }
    }

    async fn node(&self, node_id: &str) -> MultiLevelCache {
        MultiLevelCacheBuilder::new()
            .settings(self.settings.clone())
            .remote(self.remote.clone())
            .bus(self.bus.clone())
            .guard(self.guard.clone())
            .node_id(node_id)
            .build()
            .await
            .expect("Failed to build node")
    }
}

/// Give the bus's drain tasks a moment to deliver.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

#[tokio::test]
async fn test_read_your_write_without_network() {
    let cluster = Cluster::new(CacheSettings::default());
    let node_a = cluster.node("node-a").await;

    node_a
        .put("orders", "o-1", &order("o-1"))
        .await
        .expect("Failed to put");

    // Partition the remote: the write must still be visible locally
    cluster.remote.set_unavailable(true);
    let got: Option<Order> = node_a.get("orders", "o-1").await.expect("Failed to get");
    assert_eq!(got, Some(order("o-1")));
}

#[tokio::test]
async fn test_eventual_cross_node_consistency() {
    let cluster = Cluster::new(CacheSettings::default());
    let node_a = cluster.node("node-a").await;
    let node_b = cluster.node("node-b").await;

    // v1 lands on both nodes (B warms its L1 through L2)
    node_a
        .put("orders", "k", &Order {
            id: "k".to_string(),
            total_cents: 1,
        })
        .await
        .expect("Failed to put v1");
    let v1: Option<Order> = node_b.get("orders", "k").await.expect("Failed to get");
    assert_eq!(v1.map(|o| o.total_cents), Some(1));
    assert!(node_b.local().get("orders", "k").is_some());

    // A writes v2; B's stale L1 entry must drop within one invalidation
    // round-trip, not one TTL window
    node_a
        .put("orders", "k", &Order {
            id: "k".to_string(),
            total_cents: 2,
        })
        .await
        .expect("Failed to put v2");
    settle().await;

    assert!(
        node_b.local().get("orders", "k").is_none(),
        "stale L1 entry survived the invalidation round-trip"
    );

    // B's next read sees v2 via L2
    let v2: Option<Order> = node_b.get("orders", "k").await.expect("Failed to get");
    assert_eq!(v2.map(|o| o.total_cents), Some(2));
}

#[tokio::test]
async fn test_self_echo_suppression() {
    let cluster = Cluster::new(CacheSettings::default());
    let node_a = cluster.node("node-a").await;

    node_a
        .put("orders", "o-1", &order("o-1"))
        .await
        .expect("Failed to put");

    // The node receives its own published invalidation; it must not evict
    // the entry it just wrote
    settle().await;
    assert!(
        node_a.local().get("orders", "o-1").is_some(),
        "node evicted its own just-written entry"
    );
}

#[tokio::test]
async fn test_single_flight_within_node() {
    let cluster = Cluster::new(CacheSettings::default());
    let node = cluster.node("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let node = node.clone();
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            node.get_or_load("orders", "hot", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Some(order("hot")))
            })
            .await
            .expect("Failed to get_or_load")
        }));
    }

    for handle in handles {
        let got: Option<Order> = handle.await.expect("Task panicked");
        assert_eq!(got, Some(order("hot")));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1, "loader ran more than once");
}

#[tokio::test]
async fn test_single_flight_across_nodes() {
    // Generous wait so followers outlast the winner's load
    let settings = CacheSettings {
        guard: GuardSettings {
            wait: Duration::from_secs(2),
            ..GuardSettings::default()
        },
        ..CacheSettings::default()
    };
    let cluster = Cluster::new(settings);
    let node_a = cluster.node("node-a").await;
    let node_b = cluster.node("node-b").await;
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for node in [node_a, node_b] {
        for _ in 0..4 {
            let node = node.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                node.get_or_load("orders", "hot", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Some(order("hot")))
                })
                .await
                .expect("Failed to get_or_load")
            }));
        }
    }

    for handle in handles {
        let got: Option<Order> = handle.await.expect("Task panicked");
        assert_eq!(got, Some(order("hot")));
    }
    assert_eq!(
        calls.load(Ordering::SeqCst),
        1,
        "loader ran more than once cluster-wide"
    );
}

#[tokio::test]
async fn test_negative_caching_stops_repeat_lookups() {
    let mut settings = CacheSettings::default();
    settings.caches.insert(
        "orders".to_string(),
        CacheOverrides {
            allow_null_values: Some(true),
            ..CacheOverrides::default()
        },
    );
    let cluster = Cluster::new(settings);
    let node = cluster.node("node-a").await;
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let calls = Arc::clone(&calls);
        let got: Option<Order> = node
            .get_or_load("orders", "missing", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .await
            .expect("Failed to get_or_load");
        assert_eq!(got, None);
    }

    assert_eq!(
        calls.load(Ordering::SeqCst),
        1,
        "confirmed absence was looked up again"
    );
}

#[tokio::test]
async fn test_sentinel_shared_across_nodes() {
    let mut settings = CacheSettings::default();
    settings.caches.insert(
        "orders".to_string(),
        CacheOverrides {
            allow_null_values: Some(true),
            ..CacheOverrides::default()
        },
    );
    let cluster = Cluster::new(settings);
    let node_a = cluster.node("node-a").await;
    let node_b = cluster.node("node-b").await;
    let calls = Arc::new(AtomicUsize::new(0));

    // A confirms the absence and caches the sentinel in L2
    let calls_a = Arc::clone(&calls);
    let _: Option<Order> = node_a
        .get_or_load("orders", "missing", move || async move {
            calls_a.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .await
        .expect("Failed to get_or_load");

    // B finds the sentinel via L2; its loader never runs
    let calls_b = Arc::clone(&calls);
    let got: Option<Order> = node_b
        .get_or_load("orders", "missing", move || async move {
            calls_b.fetch_add(1, Ordering::SeqCst);
            Ok(Some(order("ghost")))
        })
        .await
        .expect("Failed to get_or_load");

    assert_eq!(got, None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_ratio_ttl_expires_l1_before_l2() {
    // 300ms remote TTL with a 0.5 ratio: L1 window is 150ms
    let mut settings = CacheSettings::default();
    settings.caches.insert(
        "orders".to_string(),
        CacheOverrides {
            ttl: Some(Duration::from_millis(300)),
            local_ttl_ratio: Some(0.5),
            ..CacheOverrides::default()
        },
    );
    let cluster = Cluster::new(settings);
    let node = cluster.node("node-a").await;

    node.put("orders", "o-1", &order("o-1"))
        .await
        .expect("Failed to put");

    // Inside both windows: L1 serves
    assert!(node.local().get("orders", "o-1").is_some());

    // Past the L1 window, inside the L2 window: L1 expired, L2 serves
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        node.local().get("orders", "o-1").is_none(),
        "L1 entry outlived its derived TTL"
    );
    let got: Option<Order> = node.get("orders", "o-1").await.expect("Failed to get");
    assert_eq!(got, Some(order("o-1")), "L2 entry expired too early");

    // Past the L2 window: gone everywhere. The L2 read above backfilled
    // L1 with a fresh derived TTL, so wait out both windows again.
    tokio::time::sleep(Duration::from_millis(350)).await;
    let got: Option<Order> = node.get("orders", "o-1").await.expect("Failed to get");
    assert_eq!(got, None);
}

#[tokio::test]
async fn test_evict_scenario_orders_o1() {
    // Default spec: ttl=10m, maxEntries=10000, allowNullValues=false
    let cluster = Cluster::new(CacheSettings::default());
    let node_a = cluster.node("node-a").await;
    let node_b = cluster.node("node-b").await;

    node_a
        .put("orders", "o-1", &order("o-1"))
        .await
        .expect("Failed to put");

    // B warms its L1 from L2
    let _: Option<Order> = node_b.get("orders", "o-1").await.expect("Failed to get");
    assert!(node_b.local().get("orders", "o-1").is_some());

    // Evict removes the entry from both layers and broadcasts an
    // unconditional (versionless) KEY invalidation
    assert!(node_a
        .evict("orders", "o-1")
        .await
        .expect("Failed to evict"));
    assert!(node_a.local().get("orders", "o-1").is_none());
    assert_eq!(cluster.remote.len(), 0);

    settle().await;
    assert!(
        node_b.local().get("orders", "o-1").is_none(),
        "unconditional invalidation did not drop the remote node's entry"
    );

    let got: Option<Order> = node_b.get("orders", "o-1").await.expect("Failed to get");
    assert_eq!(got, None);
}

#[tokio::test]
async fn test_clear_broadcast_empties_other_nodes() {
    let cluster = Cluster::new(CacheSettings::default());
    let node_a = cluster.node("node-a").await;
    let node_b = cluster.node("node-b").await;

    node_a
        .put("orders", "o-1", &order("o-1"))
        .await
        .expect("Failed to put");
    node_a
        .put("users", "u-1", &order("u-1"))
        .await
        .expect("Failed to put");
    let _: Option<Order> = node_b.get("orders", "o-1").await.expect("Failed to get");
    let _: Option<Order> = node_b.get("users", "u-1").await.expect("Failed to get");

    node_a.clear("orders").await.expect("Failed to clear");
    settle().await;

    // The CACHE invalidation is scoped to one name
    assert!(node_b.local().get("orders", "o-1").is_none());
    assert!(node_b.local().get("users", "u-1").is_some());

    let gone: Option<Order> = node_b.get("orders", "o-1").await.expect("Failed to get");
    assert_eq!(gone, None);
}

#[tokio::test]
async fn test_versioned_invalidation_keeps_newer_entry() {
    let cluster = Cluster::new(CacheSettings::default());
    let node_a = cluster.node("node-a").await;
    let node_b = cluster.node("node-b").await;

    // B already holds the newest write locally
    node_b
        .put("orders", "k", &Order {
            id: "k".to_string(),
            total_cents: 2,
        })
        .await
        .expect("Failed to put");
    let newest = node_b
        .local()
        .get("orders", "k")
        .expect("Entry missing")
        .version;

    // A delayed invalidation for an older write arrives out of order
    node_b.handle_invalidation(tiercache::InvalidationMessage::of_key_versioned(
        "orders",
        "k",
        node_a.node_id(),
        newest - 1,
    ));

    assert!(
        node_b.local().get("orders", "k").is_some(),
        "an out-of-date invalidation dropped a newer local entry"
    );
}

#[tokio::test]
async fn test_get_all_across_layers() {
    let cluster = Cluster::new(CacheSettings::default());
    let node_a = cluster.node("node-a").await;
    let node_b = cluster.node("node-b").await;

    node_a
        .put_all(
            "orders",
            vec![
                ("o-1".to_string(), order("o-1")),
                ("o-2".to_string(), order("o-2")),
                ("o-3".to_string(), order("o-3")),
            ],
        )
        .await
        .expect("Failed to put_all");

    // Warm one key into B's L1; the rest come from L2 in one batch
    let _: Option<Order> = node_b.get("orders", "o-1").await.expect("Failed to get");

    let all: HashMap<String, Order> = node_b
        .get_all("orders", &["o-1", "o-2", "o-3", "o-4"])
        .await
        .expect("Failed to get_all");

    assert_eq!(all.len(), 3);
    assert!(all.contains_key("o-1"));
    assert!(all.contains_key("o-3"));
    assert!(!all.contains_key("o-4"));

    // The batch backfilled B's L1
    assert!(node_b.local().get("orders", "o-2").is_some());
}

#[tokio::test]
async fn test_degraded_remote_recovers_reads() {
    let cluster = Cluster::new(CacheSettings::default());
    let node_a = cluster.node("node-a").await;
    let node_b = cluster.node("node-b").await;

    node_a
        .put("orders", "o-1", &order("o-1"))
        .await
        .expect("Failed to put");

    // B cannot reach the remote: the read degrades to a miss, no error
    cluster.remote.set_unavailable(true);
    let miss: Option<Order> = node_b.get("orders", "o-1").await.expect("Failed to get");
    assert_eq!(miss, None);
    cluster.remote.set_unavailable(false);
}
