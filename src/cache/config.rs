//! Cache configuration.
//!
//! Controls entry lifetimes per cache class, with optional per-namespace
//! overrides loaded from `vynox.toml`.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::keys::Namespace;

// Default lifetimes, in seconds
const DEFAULT_LIST_TTL_SECS: u64 = 60;
const DEFAULT_POINT_TTL_SECS: u64 = 300;
const DEFAULT_LOOKUP_TTL_SECS: u64 = 15;
const DEFAULT_AGGREGATE_TTL_SECS: u64 = 15;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

// Built-in per-namespace overrides, in seconds
const REFERENCE_LIST_TTL_SECS: u64 = 300;
const SESSION_POINT_TTL_SECS: u64 = 120;

/// Per-namespace lifetime overrides.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NamespaceTtl {
    pub list_ttl_secs: Option<u64>,
    pub point_ttl_secs: Option<u64>,
    pub lookup_ttl_secs: Option<u64>,
}

/// Resolved lifetimes for one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub list: Duration,
    pub point: Duration,
    pub lookup: Duration,
}

/// Cache configuration, resolved from the `[cache]` settings table.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch; when off every read goes to the persistent store.
    pub enabled: bool,
    /// Lifetime of generation-stamped list entries.
    pub list_ttl_secs: u64,
    /// Lifetime of point entries (`id:`, `name:`, `type:`).
    pub point_ttl_secs: u64,
    /// Lifetime of lookup entries, including cached "absent" results.
    pub lookup_ttl_secs: u64,
    /// Lifetime of TTL-only aggregate entries.
    pub aggregate_ttl_secs: u64,
    /// Maximum expiring entries held by the in-process store.
    pub memory_capacity: usize,
    /// Overrides keyed by namespace, e.g. `"v1:countries"`.
    pub namespaces: HashMap<String, NamespaceTtl>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            list_ttl_secs: DEFAULT_LIST_TTL_SECS,
            point_ttl_secs: DEFAULT_POINT_TTL_SECS,
            lookup_ttl_secs: DEFAULT_LOOKUP_TTL_SECS,
            aggregate_ttl_secs: DEFAULT_AGGREGATE_TTL_SECS,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            namespaces: builtin_overrides(),
        }
    }
}

fn builtin_overrides() -> HashMap<String, NamespaceTtl> {
    let reference = NamespaceTtl {
        list_ttl_secs: Some(REFERENCE_LIST_TTL_SECS),
        ..NamespaceTtl::default()
    };
    let mut overrides = HashMap::new();
    for namespace in ["v1:countries", "v1:cities", "v1:faqs"] {
        overrides.insert(namespace.to_string(), reference.clone());
    }
    overrides.insert(
        "v1:connectivity".to_string(),
        NamespaceTtl {
            point_ttl_secs: Some(SESSION_POINT_TTL_SECS),
            ..NamespaceTtl::default()
        },
    );
    overrides
}

impl CacheConfig {
    /// Lifetimes for `namespace`, falling back to the global defaults per class.
    pub fn ttl_policy(&self, namespace: Namespace) -> TtlPolicy {
        let overrides = self.namespaces.get(namespace.as_str());
        let pick = |specific: Option<u64>, global: u64| {
            Duration::from_secs(non_zero_secs(specific.unwrap_or(global)))
        };

        TtlPolicy {
            list: pick(overrides.and_then(|o| o.list_ttl_secs), self.list_ttl_secs),
            point: pick(overrides.and_then(|o| o.point_ttl_secs), self.point_ttl_secs),
            lookup: pick(
                overrides.and_then(|o| o.lookup_ttl_secs),
                self.lookup_ttl_secs,
            ),
        }
    }

    pub fn aggregate_ttl(&self) -> Duration {
        Duration::from_secs(non_zero_secs(self.aggregate_ttl_secs))
    }

    /// Returns the in-process store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

/// Every cached entry must expire; a zero lifetime is clamped to one second.
fn non_zero_secs(secs: u64) -> u64 {
    secs.max(1)
}
