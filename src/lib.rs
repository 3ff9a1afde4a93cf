//! # tiercache
//!
//! A multi-level cache consistency engine for Rust.
//!
//! ## Features
//!
//! - **Two coherent tiers:** a bounded in-process cache (L1) in front of a
//!   shared remote cache (L2), with L1 TTLs derived from L2 TTLs so
//!   staleness stays bounded
//! - **Cross-node invalidation:** every write broadcasts a versioned
//!   invalidation over pub/sub; stale L1 entries on other nodes drop
//!   proactively instead of waiting out their TTL
//! - **Stampede protection:** a distributed per-key guard limits loader
//!   execution to one caller cluster-wide
//! - **Negative caching:** confirmed-absent lookups cache a structural
//!   sentinel, stopping repeated backend lookups for missing keys
//! - **Degrades gracefully:** remote failures turn reads L1-only with a
//!   warning; the engine never trades availability for a cache hit
//! - **Backend Agnostic:** in-memory implementations for every seam, Redis
//!   implementations behind the `redis` feature
//!
//! ## Quick Start
//!
//! ```ignore
//! use tiercache::{MultiLevelCacheBuilder, bus::InMemoryBus, remote::InMemoryRemote};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Order {
//!     id: String,
//!     total_cents: u64,
//! }
//!
//! # async fn example() -> tiercache::Result<()> {
//! // Assemble the engine; swap in RedisRemote/RedisBus/RedisGuard for a
//! // real deployment.
//! let cache = MultiLevelCacheBuilder::new()
//!     .remote(InMemoryRemote::new())
//!     .bus(InMemoryBus::new())
//!     .build()
//!     .await?;
//!
//! // Write-through with invalidation broadcast
//! let order = Order { id: "o-1".to_string(), total_cents: 4200 };
//! cache.put("orders", "o-1", &order).await?;
//!
//! // L1 -> L2 read
//! let hit: Option<Order> = cache.get("orders", "o-1").await?;
//!
//! // Single-flight load on miss
//! let loaded: Option<Order> = cache
//!     .get_or_load("orders", "o-2", || async {
//!         Ok(Some(Order { id: "o-2".to_string(), total_cents: 100 }))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate log;

pub mod bus;
pub mod error;
pub mod guard;
pub mod key;
pub mod local;
pub mod observability;
pub mod orchestrator;
pub mod refresh;
pub mod remote;
pub mod serialization;
pub mod spec;
pub mod ttl;
pub mod value;

// Re-exports for convenience
pub use bus::{InvalidationBus, InvalidationKind, InvalidationMessage};
pub use error::{Error, Result};
pub use guard::StampedeGuard;
pub use key::KeyBuilder;
pub use local::LocalLayer;
pub use orchestrator::{MultiLevelCache, MultiLevelCacheBuilder};
pub use refresh::RefreshTask;
pub use remote::RemoteLayer;
pub use spec::{CacheSettings, CacheSpecification, SpecificationResolver};
pub use ttl::TtlStrategy;
pub use value::{CacheState, VersionClock, VersionedValue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
