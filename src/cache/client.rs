//! Never-throw facade over a [`KvStore`].
//!
//! Store failures stop here: reads degrade to misses and writes to no-ops, with
//! a log line and a counter for each. Callers never observe the cache.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, error, warn};

use super::METRIC_CACHE_STORE_ERROR;
use super::store::{KvError, KvStore};

/// Handle to the cache store; `disabled` handles pass everything through.
#[derive(Clone, Default)]
pub struct CacheClient {
    store: Option<Arc<dyn KvStore>>,
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl CacheClient {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Read and decode `key`. Misses, store failures and undecodable payloads are all `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(
                    op = "get",
                    key,
                    error = %err,
                    "Cached payload no longer decodes; treating as miss"
                );
                None
            }
        }
    }

    pub async fn get_raw(&self, key: &str) -> Option<String> {
        self.fetch_raw(key).await.flatten()
    }

    /// Like [`Self::get_raw`], but tells a miss (`Some(None)`) apart from a
    /// store that could not answer (`None`).
    pub async fn fetch_raw(&self, key: &str) -> Option<Option<String>> {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(value) => Some(value),
            Err(err) => {
                report("get", key, &err);
                None
            }
        }
    }

    /// Encode and store `value` for `ttl`. Failures are logged and dropped.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(op = "set", key, error = %err, "Failed to encode cache payload");
                return;
            }
        };
        if let Err(err) = store.set(key, &payload, Some(ttl)).await {
            report("set", key, &err);
        }
    }

    /// Write a non-expiring value if `key` is absent. `None` when the store could not answer.
    pub async fn set_raw_if_absent(&self, key: &str, value: &str) -> Option<bool> {
        let store = self.store.as_ref()?;
        match store.set_if_absent(key, value).await {
            Ok(written) => Some(written),
            Err(err) => {
                report("set_if_absent", key, &err);
                None
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if let Err(err) = store.delete(key).await {
            report("delete", key, &err);
        }
    }

    /// Atomically increment the counter at `key`. `None` when the increment did not happen.
    pub async fn increment(&self, key: &str) -> Option<i64> {
        let store = self.store.as_ref()?;
        match store.increment(key).await {
            Ok(value) => Some(value),
            Err(err) => {
                report("increment", key, &err);
                None
            }
        }
    }

    /// Operator check; unlike the data path this reports failures to the caller.
    pub async fn ping(&self) -> Result<(), KvError> {
        self.require_store()?.ping().await
    }

    /// Drop every cached key. Operator only.
    pub async fn flush(&self) -> Result<(), KvError> {
        self.require_store()?.flush().await
    }

    fn require_store(&self) -> Result<&Arc<dyn KvStore>, KvError> {
        self.store
            .as_ref()
            .ok_or_else(|| KvError::unavailable("caching is disabled"))
    }
}

fn report(op: &'static str, key: &str, err: &KvError) {
    counter!(METRIC_CACHE_STORE_ERROR, "op" => op).increment(1);
    match err {
        KvError::NotAnInteger { .. } => error!(
            op,
            key,
            error = %err,
            "Cache key holds a value of the wrong type; operation skipped"
        ),
        KvError::Unavailable(_) | KvError::Timeout => warn!(
            op,
            key,
            error = %err,
            "Cache store unavailable; continuing without cache"
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::store::MemoryStore;

    fn memory_client() -> (Arc<MemoryStore>, CacheClient) {
        let store = Arc::new(MemoryStore::default());
        let client = CacheClient::new(store.clone());
        (store, client)
    }

    #[tokio::test]
    async fn disabled_client_is_a_pass_through() {
        let client = CacheClient::disabled();
        client.set("k", &json!({"a": 1}), Duration::from_secs(5)).await;
        assert!(client.get::<serde_json::Value>("k").await.is_none());
        assert!(client.increment("k").await.is_none());
        assert!(client.ping().await.is_err());
    }

    #[tokio::test]
    async fn round_trips_json_payloads() {
        let (_, client) = memory_client();
        client
            .set("v1:ads:id:1", &json!({"id": "1", "status": true}), Duration::from_secs(5))
            .await;
        let cached: serde_json::Value = client.get("v1:ads:id:1").await.unwrap();
        assert_eq!(cached["status"], json!(true));
    }

    #[tokio::test]
    async fn undecodable_payload_reads_as_miss() {
        let (store, client) = memory_client();
        store
            .set("v1:ads:id:1", "not json", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(client.get::<serde_json::Value>("v1:ads:id:1").await.is_none());
    }

    #[tokio::test]
    async fn increment_on_drifted_key_is_swallowed() {
        let (store, client) = memory_client();
        store.set("v1:ads:ver", "oops", None).await.unwrap();
        assert!(client.increment("v1:ads:ver").await.is_none());
        assert_eq!(
            store.get("v1:ads:ver").await.unwrap().as_deref(),
            Some("oops")
        );
    }
}
