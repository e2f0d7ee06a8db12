//! Versioned read-through protocol.
//!
//! Reads consult the cache first and fall back to a compute closure that
//! queries the persistent store; writers call [`VersionedCache::invalidate_on_write`]
//! after the store write has succeeded.
//!
//! The generation is read before the compute closure runs. A write that
//! commits while a miss is being computed bumps the generation, so the
//! possibly-stale result lands under a key no reader will derive again.
//! Point entries have no generation in their key; a point miss that spans a
//! bump is returned but not stored. When a generation cannot be read at all,
//! list reads skip the cache entirely.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, instrument};

use super::client::CacheClient;
use super::config::{CacheConfig, TtlPolicy};
use super::generation::{Generation, Generations};
use super::keys::{Fingerprint, Namespace, PointKey};
use super::{METRIC_CACHE_COMPUTE_MS, METRIC_CACHE_HIT, METRIC_CACHE_MISS};

/// Entry point for cached reads and write-side invalidation.
#[derive(Debug, Clone)]
pub struct VersionedCache {
    client: CacheClient,
    generations: Generations,
    config: Arc<CacheConfig>,
}

impl VersionedCache {
    /// Build the protocol over `client`. A config with `enabled = false` disables caching
    /// regardless of the client.
    pub fn new(client: CacheClient, config: CacheConfig) -> Self {
        let client = if config.enabled {
            client
        } else {
            CacheClient::disabled()
        };
        Self {
            generations: Generations::new(client.clone()),
            client,
            config: Arc::new(config),
        }
    }

    pub fn disabled() -> Self {
        Self::new(CacheClient::disabled(), CacheConfig::default())
    }

    pub fn client(&self) -> &CacheClient {
        &self.client
    }

    pub fn generations(&self) -> &Generations {
        &self.generations
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn ttl_policy(&self, namespace: Namespace) -> TtlPolicy {
        self.config.ttl_policy(namespace)
    }

    /// Serve a list query from the generation-stamped cache or compute and store it.
    ///
    /// `query` must describe every input that shapes the result (filters,
    /// paging, scope). Errors from `compute` propagate and nothing is cached.
    pub async fn read_through_list<Q, T, E, F, Fut>(
        &self,
        namespace: Namespace,
        query: &Q,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        Q: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.read_through_list_spanning(namespace, &[], query, ttl, compute)
            .await
    }

    /// List read whose result also depends on the collections in `upstream`.
    ///
    /// Their generations are folded into the fingerprint, so a write to any of
    /// them retires the entry just like a write to `namespace` does.
    pub async fn read_through_list_spanning<Q, T, E, F, Fut>(
        &self,
        namespace: Namespace,
        upstream: &[Namespace],
        query: &Q,
        ttl: Duration,
        compute: F,
    ) -> Result<T, E>
    where
        Q: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(key) = self.list_key(namespace, upstream, query).await else {
            record_lookup(namespace, "list", false);
            return timed("list", compute).await;
        };

        if let Some(hit) = self.client.get::<T>(&key).await {
            record_lookup(namespace, "list", true);
            return Ok(hit);
        }
        record_lookup(namespace, "list", false);

        let value = timed("list", compute).await?;
        self.client.set(&key, &value, ttl).await;
        Ok(value)
    }

    /// Serve a single entity by natural key. Only found entities are cached.
    pub async fn read_through_point<T, E, F, Fut>(
        &self,
        namespace: Namespace,
        point: &PointKey,
        ttl: Duration,
        compute: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let key = namespace.point_key(point);

        if let Some(hit) = self.client.get::<T>(&key).await {
            record_lookup(namespace, "point", true);
            return Ok(Some(hit));
        }
        record_lookup(namespace, "point", false);

        let before = self.generations.current(namespace).await;
        let value = timed("point", compute).await?;
        if let Some(found) = value.as_ref() {
            if self.unchanged_since(namespace, before).await {
                self.client.set(&key, found, ttl).await;
            }
        }
        Ok(value)
    }

    /// Like [`Self::read_through_point`], but "absent" is cached too.
    ///
    /// Meant for hot existence checks whose key is invalidated on every write
    /// that could change the answer, paired with a short `ttl`.
    pub async fn read_through_lookup<T, E, F, Fut>(
        &self,
        namespace: Namespace,
        point: &PointKey,
        ttl: Duration,
        compute: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let key = namespace.point_key(point);

        if let Some(hit) = self.client.get::<Option<T>>(&key).await {
            record_lookup(namespace, "lookup", true);
            return Ok(hit);
        }
        record_lookup(namespace, "lookup", false);

        let before = self.generations.current(namespace).await;
        let value = timed("lookup", compute).await?;
        if self.unchanged_since(namespace, before).await {
            self.client.set(&key, &value, ttl).await;
        }
        Ok(value)
    }

    /// Invalidate after a successful write: delete `points`, then bump the generation once.
    ///
    /// Both steps finish before this returns, so a read issued after the write
    /// acknowledgement cannot observe the old state.
    #[instrument(skip_all, fields(namespace = %namespace, points = points.len()))]
    pub async fn invalidate_on_write(&self, namespace: Namespace, points: &[PointKey]) {
        self.evict(namespace, points).await;
        self.generations.bump(namespace).await;
    }

    /// Delete point entries without touching the generation.
    pub async fn evict(&self, namespace: Namespace, points: &[PointKey]) {
        let mut keys: Vec<String> = points
            .iter()
            .map(|point| namespace.point_key(point))
            .collect();
        keys.sort();
        keys.dedup();

        join_all(keys.iter().map(|key| self.client.delete(key))).await;
        debug!(namespace = %namespace, evicted = keys.len(), "Cache point entries evicted");
    }
}

impl VersionedCache {
    /// List key for `query`, or `None` when any involved generation is unknown.
    async fn list_key<Q: Serialize + ?Sized>(
        &self,
        namespace: Namespace,
        upstream: &[Namespace],
        query: &Q,
    ) -> Option<String> {
        let generation = self.generations.current(namespace).await?;
        if upstream.is_empty() {
            return Some(namespace.list_key(&generation, &Fingerprint::of(query)));
        }

        #[derive(Serialize)]
        struct Spanning<'a, Q: ?Sized> {
            query: &'a Q,
            upstream: BTreeMap<&'static str, String>,
        }

        let mut generations = BTreeMap::new();
        for other in upstream {
            let current = self.generations.current(*other).await?;
            generations.insert(other.as_str(), current.to_string());
        }
        let spanning = Spanning {
            query,
            upstream: generations,
        };
        Some(namespace.list_key(&generation, &Fingerprint::of(&spanning)))
    }

    /// Whether no write to `namespace` was acknowledged since `before` was read.
    async fn unchanged_since(&self, namespace: Namespace, before: Option<Generation>) -> bool {
        let Some(before) = before else {
            return false;
        };
        let unchanged = self.generations.current(namespace).await.as_ref() == Some(&before);
        if !unchanged {
            debug!(namespace = %namespace, "Write landed during compute; result not cached");
        }
        unchanged
    }
}

async fn timed<T, E, F, Fut>(class: &'static str, compute: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let result = compute().await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_CACHE_COMPUTE_MS, "class" => class).record(elapsed_ms);
    result
}

fn record_lookup(namespace: Namespace, class: &'static str, hit: bool) {
    let name = if hit { METRIC_CACHE_HIT } else { METRIC_CACHE_MISS };
    counter!(name, "namespace" => namespace.as_str(), "class" => class).increment(1);
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::cache::store::MemoryStore;

    const NS: Namespace = Namespace::new("v1:widgets");
    const TTL: Duration = Duration::from_secs(60);

    fn cache() -> VersionedCache {
        VersionedCache::new(
            CacheClient::new(Arc::new(MemoryStore::default())),
            CacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn list_hit_skips_compute() {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        let query = json!({"page": 1});

        for _ in 0..3 {
            let value: Vec<u32> = cache
                .read_through_list(NS, &query, TTL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(vec![1, 2, 3])
                })
                .await
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn compute_error_propagates_and_caches_nothing() {
        let cache = cache();
        let query = json!({"page": 1});

        let failed: Result<Vec<u32>, &str> = cache
            .read_through_list(NS, &query, TTL, || async { Err("store down") })
            .await;
        assert_eq!(failed, Err("store down"));

        let recovered: Vec<u32> = cache
            .read_through_list(NS, &query, TTL, || async { Ok::<_, Infallible>(vec![9]) })
            .await
            .unwrap();
        assert_eq!(recovered, vec![9]);
    }

    #[tokio::test]
    async fn point_reads_do_not_cache_absence() {
        let cache = cache();
        let point = PointKey::id("w1");

        let missing: Option<u32> = cache
            .read_through_point(NS, &point, TTL, || async { Ok::<_, Infallible>(None) })
            .await
            .unwrap();
        assert_eq!(missing, None);

        let found: Option<u32> = cache
            .read_through_point(NS, &point, TTL, || async { Ok::<_, Infallible>(Some(5)) })
            .await
            .unwrap();
        assert_eq!(found, Some(5));
    }

    #[tokio::test]
    async fn lookups_cache_absence_until_invalidated() {
        let cache = cache();
        let point = PointKey::open_pair("u1", "s1");

        let first: Option<u32> = cache
            .read_through_lookup(NS, &point, TTL, || async { Ok::<_, Infallible>(None) })
            .await
            .unwrap();
        assert_eq!(first, None);

        let cached: Option<u32> = cache
            .read_through_lookup(NS, &point, TTL, || async { Ok::<_, Infallible>(Some(1)) })
            .await
            .unwrap();
        assert_eq!(cached, None);

        cache.invalidate_on_write(NS, &[point.clone()]).await;
        let fresh: Option<u32> = cache
            .read_through_lookup(NS, &point, TTL, || async { Ok::<_, Infallible>(Some(1)) })
            .await
            .unwrap();
        assert_eq!(fresh, Some(1));
    }

    #[tokio::test]
    async fn invalidation_bumps_generation_once() {
        let cache = cache();
        let before = cache.generations().current(NS).await;
        cache
            .invalidate_on_write(NS, &[PointKey::id("a"), PointKey::id("a"), PointKey::id("b")])
            .await;
        let after = cache.generations().current(NS).await;
        assert_eq!(before, Some(Generation::from("1")));
        assert_eq!(after, Some(Generation::from("2")));
    }

    #[tokio::test]
    async fn point_computed_across_a_write_is_not_stored() {
        let cache = cache();
        let point = PointKey::id("w1");

        let stale: Option<u32> = cache
            .read_through_point(NS, &point, TTL, || async {
                cache
                    .invalidate_on_write(NS, std::slice::from_ref(&point))
                    .await;
                Ok::<_, Infallible>(Some(1))
            })
            .await
            .unwrap();
        assert_eq!(stale, Some(1));

        let fresh: Option<u32> = cache
            .read_through_point(NS, &point, TTL, || async { Ok::<_, Infallible>(Some(2)) })
            .await
            .unwrap();
        assert_eq!(fresh, Some(2));
    }

    #[tokio::test]
    async fn lookup_computed_across_a_write_is_not_stored() {
        let cache = cache();
        let point = PointKey::open_pair("u1", "s1");

        let stale: Option<u32> = cache
            .read_through_lookup(NS, &point, TTL, || async {
                cache
                    .invalidate_on_write(NS, std::slice::from_ref(&point))
                    .await;
                Ok::<_, Infallible>(None)
            })
            .await
            .unwrap();
        assert_eq!(stale, None);

        let fresh: Option<u32> = cache
            .read_through_lookup(NS, &point, TTL, || async { Ok::<_, Infallible>(Some(7)) })
            .await
            .unwrap();
        assert_eq!(fresh, Some(7));
    }

    #[tokio::test]
    async fn spanning_list_is_retired_by_upstream_writes() {
        const UPSTREAM: Namespace = Namespace::new("v1:gadgets");
        let cache = cache();
        let query = json!({"page": 1});
        let calls = AtomicUsize::new(0);

        let read = || {
            cache.read_through_list_spanning(NS, &[UPSTREAM], &query, TTL, || async {
                Ok::<_, Infallible>(calls.fetch_add(1, Ordering::SeqCst))
            })
        };

        assert_eq!(read().await.unwrap(), 0);
        assert_eq!(read().await.unwrap(), 0);

        cache.invalidate_on_write(UPSTREAM, &[]).await;
        assert_eq!(read().await.unwrap(), 1);

        cache.invalidate_on_write(NS, &[]).await;
        assert_eq!(read().await.unwrap(), 2);
        assert_eq!(read().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn config_switch_disables_caching() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        let cache = VersionedCache::new(CacheClient::new(Arc::new(MemoryStore::default())), config);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let _: Vec<u32> = cache
                .read_through_list(NS, &json!({}), TTL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(Vec::new())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.client().is_enabled());
    }
}
