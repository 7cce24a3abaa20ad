//! Response cache for intercepted reads.
//!
//! This module provides the storage and strategies behind request routing:
//! - Entries keyed by request identity, namespaced by generation
//! - Per-class freshness policy
//! - Cache-first, network-first and stale-while-revalidate strategies
//! - Offline mode (serve cached data when the network is unreachable)

mod freshness;
mod layer;
mod storage;
mod traits;

pub use freshness::FreshnessEvaluator;
pub use layer::CacheLayer;
pub use storage::{CacheStorage, SqliteStorage};
pub(crate) use storage::{format_datetime, parse_datetime};
pub use traits::{CacheEntry, CacheGeneration, ResourceClass, ResponseSource, Served, Strategy};
