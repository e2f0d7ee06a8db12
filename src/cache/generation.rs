//! Per-namespace generation counters.
//!
//! Every list key embeds the namespace's current generation, so one atomic
//! increment retires every cached list of that namespace at once.

use std::fmt;

use metrics::counter;
use tracing::debug;

use super::METRIC_CACHE_GENERATION_BUMP;
use super::client::CacheClient;
use super::keys::Namespace;

const INITIAL_GENERATION: &str = "1";
const DISABLED_GENERATION: &str = "0";

/// Opaque generation token. Only equality matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Generation(String);

impl Generation {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Generation {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Generation {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads and advances generation counters through a [`CacheClient`].
#[derive(Debug, Clone)]
pub struct Generations {
    client: CacheClient,
}

impl Generations {
    pub fn new(client: CacheClient) -> Self {
        Self { client }
    }

    /// Current generation of `namespace`, initializing the counter on first use.
    ///
    /// Initialization only writes when the counter is absent, so a bump that
    /// lands between the read and the write is never overwritten. `None` when
    /// the store could not confirm the counter; such reads must bypass the
    /// list cache, since any generation guessed here may already be retired.
    pub async fn current(&self, namespace: Namespace) -> Option<Generation> {
        if !self.client.is_enabled() {
            return Some(Generation::from(DISABLED_GENERATION));
        }

        let key = namespace.version_key();
        if let Some(value) = self.client.fetch_raw(&key).await? {
            return Some(Generation::from(value));
        }

        let generation = if self.client.set_raw_if_absent(&key, INITIAL_GENERATION).await? {
            Some(Generation::from(INITIAL_GENERATION))
        } else {
            self.client.fetch_raw(&key).await?.map(Generation::from)
        };
        if generation.is_none() {
            debug!(namespace = %namespace, "Cache generation unconfirmed; bypassing list cache");
        }
        generation
    }

    /// Advance the generation of `namespace` by exactly one.
    ///
    /// Returns the new value, or `None` when the store could not increment it.
    pub async fn bump(&self, namespace: Namespace) -> Option<i64> {
        let next = self.client.increment(&namespace.version_key()).await?;
        counter!(METRIC_CACHE_GENERATION_BUMP, "namespace" => namespace.as_str()).increment(1);
        debug!(namespace = %namespace, generation = next, "Cache generation bumped");
        Some(next)
    }
}
