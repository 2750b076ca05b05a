//! The two stored copies of the last-assigned id.
//!
//! The fast cache holds the hot copy with a TTL; the durable store holds the
//! authoritative copy without expiry. Both are keyed by a fixed string and
//! hold the id as a base-10 string.

use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::config::SequencerConfig;
use crate::error::StoreError;
use crate::pure::parse_counter_value;
use crate::traits::DurableStore;
use crate::traits::FastCache;

/// Read/write access to the cached and durable counter entries.
#[derive(Clone)]
pub struct CounterState {
    cache: Arc<dyn FastCache>,
    durable: Arc<dyn DurableStore>,
    config: Arc<SequencerConfig>,
}

impl CounterState {
    /// Create a counter view over the given tiers.
    pub fn new(cache: Arc<dyn FastCache>, durable: Arc<dyn DurableStore>, config: Arc<SequencerConfig>) -> Self {
        Self { cache, durable, config }
    }

    /// Cached counter, if present and strictly parseable.
    ///
    /// A cache that fails to answer is treated as a miss.
    pub async fn cached(&self) -> Option<i64> {
        match self.cache.get(&self.config.cache_key).await {
            Ok(Some(raw)) => {
                let parsed = parse_counter_value(&raw);
                if parsed.is_none() {
                    debug!(key = %self.config.cache_key, raw = %raw, "ignoring unparseable cached counter");
                }
                parsed
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %self.config.cache_key, error = %e, "counter cache read failed, treating as miss");
                None
            }
        }
    }

    /// Durable counter, if present and strictly parseable.
    pub async fn durable(&self) -> Result<Option<i64>, StoreError> {
        let raw = self.durable.get(&self.config.durable_key).await?;
        Ok(raw.and_then(|raw| {
            let parsed = parse_counter_value(&raw);
            if parsed.is_none() {
                debug!(key = %self.config.durable_key, raw = %raw, "ignoring unparseable durable counter");
            }
            parsed
        }))
    }

    /// Record `id` in both tiers: cache first (with TTL), then durable.
    pub async fn store(&self, id: i64) -> Result<(), StoreError> {
        let value = id.to_string();
        self.cache.put(&self.config.cache_key, value.clone(), self.config.cache_ttl()).await?;
        self.durable.set(&self.config.durable_key, value).await?;
        Ok(())
    }

    /// Erase both tiers.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.cache.remove(&self.config.cache_key).await?;
        self.durable.delete(&self.config.durable_key).await?;
        Ok(())
    }
}

impl std::fmt::Debug for CounterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterState")
            .field("cache_key", &self.config.cache_key)
            .field("durable_key", &self.config.durable_key)
            .finish()
    }
}
