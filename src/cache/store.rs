//! Key-value store seam and the in-process store.
//!
//! [`KvStore`] is fallible: adapters report what went wrong and
//! [`super::CacheClient`] decides that none of it reaches a caller.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;
use tokio::time::Instant;

use super::lock::store_lock;

const SOURCE: &str = "cache::store";

/// Failure reported by a key-value store adapter.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    #[error("key-value store operation timed out")]
    Timeout,
    #[error("value at `{key}` is not an integer")]
    NotAnInteger { key: String },
}

impl KvError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// Minimal key-value surface the cache protocol needs.
///
/// `increment` must be atomic in the store itself; it is the only primitive
/// the generation counters rely on for concurrent writers.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Store `value`; `ttl` of `None` keeps the key until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError>;

    /// Store `value` without expiry only when `key` is absent. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, KvError>;

    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Atomically add one to the integer at `key` (absent counts as zero) and return the result.
    async fn increment(&self, key: &str) -> Result<i64, KvError>;

    /// Remove every key in the store's database.
    async fn flush(&self) -> Result<(), KvError>;

    async fn ping(&self) -> Result<(), KvError>;
}

// ============================================================================
// In-process store
// ============================================================================

const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

#[derive(Debug)]
struct ExpiringEntry {
    value: String,
    expires_at: Instant,
}

impl ExpiringEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug)]
struct MemoryState {
    /// Keys written without a TTL (generation counters). Never evicted.
    persistent: HashMap<String, String>,
    /// Keys written with a TTL, bounded by capacity.
    expiring: LruCache<String, ExpiringEntry>,
}

impl MemoryState {
    fn live_value(&mut self, key: &str, now: Instant) -> Option<String> {
        if let Some(value) = self.persistent.get(key) {
            return Some(value.clone());
        }
        let live = self.expiring.get(key).map(|entry| entry.is_live(now))?;
        if live {
            self.expiring.peek(key).map(|entry| entry.value.clone())
        } else {
            self.expiring.pop(key);
            None
        }
    }
}

/// In-process [`KvStore`] for single-node deployments and tests.
///
/// Expiry is evaluated lazily on access against the tokio clock.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

impl MemoryStore {
    /// Create a store holding at most `capacity` expiring entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                persistent: HashMap::new(),
                expiring: LruCache::new(capacity),
            }),
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut state = store_lock(&self.state, SOURCE, "get");
        Ok(state.live_value(key, Instant::now()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut state = store_lock(&self.state, SOURCE, "set");
        match ttl {
            Some(ttl) => {
                state.persistent.remove(key);
                state.expiring.put(
                    key.to_string(),
                    ExpiringEntry {
                        value: value.to_string(),
                        expires_at: Instant::now() + ttl,
                    },
                );
            }
            None => {
                state.expiring.pop(key);
                state.persistent.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, KvError> {
        let mut state = store_lock(&self.state, SOURCE, "set_if_absent");
        if state.live_value(key, Instant::now()).is_some() {
            return Ok(false);
        }
        state.persistent.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut state = store_lock(&self.state, SOURCE, "delete");
        state.persistent.remove(key);
        state.expiring.pop(key);
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, KvError> {
        let mut state = store_lock(&self.state, SOURCE, "increment");
        let now = Instant::now();
        let current = state.live_value(key, now);

        let next = match current.as_deref() {
            None => 1,
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|value| value.checked_add(1))
                .ok_or_else(|| KvError::NotAnInteger {
                    key: key.to_string(),
                })?,
        };

        // INCR keeps an existing TTL.
        if let Some(entry) = state.expiring.get_mut(key) {
            entry.value = next.to_string();
        } else {
            state.persistent.insert(key.to_string(), next.to_string());
        }
        Ok(next)
    }

    async fn flush(&self) -> Result<(), KvError> {
        let mut state = store_lock(&self.state, SOURCE, "flush");
        state.persistent.clear();
        state.expiring.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<(), KvError> {
        Ok(())
    }
}
