//! TTL-only cache for cross-collection aggregates.
//!
//! Aggregates (dashboard counters, per-server session stats) read several
//! namespaces at once, so no single generation can retire them. They take no
//! part in invalidation and are bounded by a short lifetime instead.

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::{Serialize, de::DeserializeOwned};

use super::client::CacheClient;
use super::keys::{Fingerprint, Namespace};
use super::{METRIC_CACHE_COMPUTE_MS, METRIC_CACHE_HIT, METRIC_CACHE_MISS};

/// Read-through cache whose entries only ever expire.
#[derive(Debug, Clone)]
pub struct AggregateCache {
    client: CacheClient,
    namespace: Namespace,
    ttl: Duration,
}

impl AggregateCache {
    pub fn new(client: CacheClient, namespace: Namespace, ttl: Duration) -> Self {
        Self {
            client,
            namespace,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Serve `scope` for `params` from cache or compute it. Errors propagate uncached.
    pub async fn read_through<P, T, E, F, Fut>(
        &self,
        scope: &str,
        params: &P,
        compute: F,
    ) -> Result<T, E>
    where
        P: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.namespace.scoped_key(scope, &Fingerprint::of(params));

        if let Some(hit) = self.client.get::<T>(&key).await {
            counter!(METRIC_CACHE_HIT, "namespace" => self.namespace.as_str(), "class" => "aggregate")
                .increment(1);
            return Ok(hit);
        }
        counter!(METRIC_CACHE_MISS, "namespace" => self.namespace.as_str(), "class" => "aggregate")
            .increment(1);

        let started = Instant::now();
        let value = compute().await?;
        histogram!(METRIC_CACHE_COMPUTE_MS, "class" => "aggregate")
            .record(started.elapsed().as_secs_f64() * 1000.0);

        self.client.set(&key, &value, self.ttl).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::cache::store::MemoryStore;

    const NS: Namespace = Namespace::new("v1:dashboard");

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = AggregateCache::new(
            CacheClient::new(Arc::new(MemoryStore::default())),
            NS,
            Duration::from_secs(15),
        );
        let params = json!({"recent_limit": 10});

        let first: u64 = cache
            .read_through("stats", &params, || async { Ok::<_, Infallible>(1) })
            .await
            .unwrap();
        let cached: u64 = cache
            .read_through("stats", &params, || async { Ok::<_, Infallible>(2) })
            .await
            .unwrap();
        assert_eq!((first, cached), (1, 1));

        tokio::time::advance(Duration::from_secs(16)).await;
        let refreshed: u64 = cache
            .read_through("stats", &params, || async { Ok::<_, Infallible>(3) })
            .await
            .unwrap();
        assert_eq!(refreshed, 3);
    }

    #[tokio::test]
    async fn scopes_do_not_share_entries() {
        let cache = AggregateCache::new(
            CacheClient::new(Arc::new(MemoryStore::default())),
            NS,
            Duration::from_secs(15),
        );
        let params = json!({});
        let stats: u64 = cache
            .read_through("stats", &params, || async { Ok::<_, Infallible>(1) })
            .await
            .unwrap();
        let other: u64 = cache
            .read_through("server-sessions", &params, || async { Ok::<_, Infallible>(2) })
            .await
            .unwrap();
        assert_eq!((stats, other), (1, 2));
    }
}
