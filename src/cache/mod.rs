//! Read-through caching over a key-value store.
//!
//! Layers, bottom up:
//! - [`KvStore`]: fallible store seam ([`MemoryStore`] here, Redis in `infra`)
//! - [`CacheClient`]: never-throw facade; failures become misses and no-ops
//! - [`keys`]: namespace, point key and fingerprint derivation
//! - [`Generations`]: per-namespace counters stamped into list keys
//! - [`VersionedCache`]: read-through for lists, points and lookups, plus
//!   write-side invalidation
//! - [`AggregateCache`]: TTL-only entries spanning several namespaces

mod aggregate;
mod client;
mod config;
mod generation;
pub mod keys;
mod lock;
mod protocol;
mod store;

pub use aggregate::AggregateCache;
pub use client::CacheClient;
pub use config::{CacheConfig, NamespaceTtl, TtlPolicy};
pub use generation::{Generation, Generations};
pub use keys::{Fingerprint, Namespace, PointKey};
pub use protocol::VersionedCache;
pub use store::{KvError, KvStore, MemoryStore};

pub const METRIC_CACHE_HIT: &str = "vynox_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "vynox_cache_miss_total";
pub const METRIC_CACHE_STORE_ERROR: &str = "vynox_cache_store_error_total";
pub const METRIC_CACHE_GENERATION_BUMP: &str = "vynox_cache_generation_bump_total";
pub const METRIC_CACHE_COMPUTE_MS: &str = "vynox_cache_compute_ms";
