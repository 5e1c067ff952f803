//! Two-tier cache store.
//!
//! Backends speak raw JSON strings and return `Result`s. [`CacheStore`] owns
//! the wire format and turns every backend failure into a miss (on read) or
//! a no-op (on write), falling back to the in-process tier for that one
//! operation when the remote tier is unavailable.

mod memory;
mod redis;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use squall_core::{CacheConfig, Clock};

use crate::metrics::MetricsSink;
use crate::types::Payload;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
    #[error("Cache entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// A cached payload and the epoch second it was fetched from the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: Payload,
    pub fetched_at: f64,
}

impl CacheEntry {
    pub fn new(payload: Payload, fetched_at: f64) -> Self {
        Self { payload, fetched_at }
    }

    /// Seconds since fetch, never negative.
    pub fn age(&self, now: f64) -> f64 {
        (now - self.fetched_at).max(0.0)
    }

    pub fn to_wire(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_wire(raw: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Storage tier holding wire-encoded entries.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Metric label for this tier ("memory", "redis").
    fn tier(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError>;
}

pub struct CacheStore {
    memory: Arc<MemoryBackend>,
    remote: Option<Arc<dyn CacheBackend>>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("memory_entries", &self.memory.len())
            .field("remote", &self.remote.as_ref().map(|r| r.tier()))
            .finish()
    }
}

impl CacheStore {
    pub fn in_memory(memory: MemoryBackend, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            memory: Arc::new(memory),
            remote: None,
            metrics,
        }
    }

    pub fn with_remote(
        memory: MemoryBackend,
        remote: Arc<dyn CacheBackend>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            memory: Arc::new(memory),
            remote: Some(remote),
            metrics,
        }
    }

    /// Build the store described by `config`.
    ///
    /// A redis that is unreachable at startup stays configured: each
    /// operation retries it and falls back to memory on failure. Only a
    /// malformed URL drops the remote tier.
    pub async fn from_config(
        config: &CacheConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let memory = MemoryBackend::new(config.memory_max_entries, clock);

        let Some(url) = config.redis_url.as_deref() else {
            tracing::info!("Cache: in-memory only ({} entries)", config.memory_max_entries);
            return Self::in_memory(memory, metrics);
        };

        let redis = match RedisBackend::new(url) {
            Ok(redis) => redis,
            Err(e) => {
                tracing::warn!("Invalid redis URL ({}), using in-memory cache only", e);
                return Self::in_memory(memory, metrics);
            }
        };

        match redis.warm_up().await {
            Ok(()) => tracing::info!("Cache: redis with in-memory fallback"),
            Err(e) => tracing::warn!("Redis unreachable at startup ({}), will retry on each operation", e),
        }
        Self::with_remote(memory, Arc::new(redis), metrics)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Look up `key`. Backend failures and undecodable bytes read as absent.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(raw) => return self.decode(remote.tier(), raw),
                Err(e) => {
                    tracing::warn!(key, "Cache get failed on {}, falling back to memory: {}", remote.tier(), e);
                    self.metrics.cache_error(remote.tier(), "get");
                }
            }
        }

        match self.memory.get(key).await {
            Ok(raw) => self.decode(self.memory.tier(), raw),
            Err(e) => {
                tracing::warn!(key, "Cache get failed on memory: {}", e);
                self.metrics.cache_error(self.memory.tier(), "get");
                None
            }
        }
    }

    /// Store `entry` for `ttl_seconds`. Failures are logged and dropped.
    pub async fn set(&self, key: &str, entry: &CacheEntry, ttl_seconds: u64) {
        let wire = match entry.to_wire() {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(key, "Cache entry could not be encoded: {}", e);
                self.metrics.cache_error(self.primary_tier(), "encode");
                return;
            }
        };

        if let Some(remote) = &self.remote {
            match remote.set(key, &wire, ttl_seconds).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(key, "Cache set failed on {}, falling back to memory: {}", remote.tier(), e);
                    self.metrics.cache_error(remote.tier(), "set");
                }
            }
        }

        if let Err(e) = self.memory.set(key, &wire, ttl_seconds).await {
            tracing::warn!(key, "Cache set failed on memory: {}", e);
            self.metrics.cache_error(self.memory.tier(), "set");
        }
    }

    fn primary_tier(&self) -> &'static str {
        self.remote.as_ref().map_or(self.memory.tier(), |r| r.tier())
    }

    fn decode(&self, tier: &'static str, raw: Option<String>) -> Option<CacheEntry> {
        let Some(raw) = raw else {
            self.metrics.cache_miss(tier);
            return None;
        };

        match CacheEntry::from_wire(&raw) {
            Ok(entry) => {
                self.metrics.cache_hit(tier);
                Some(entry)
            }
            Err(e) => {
                tracing::warn!("Discarding undecodable {} cache entry: {}", tier, e);
                self.metrics.cache_error(tier, "decode");
                None
            }
        }
    }
}
