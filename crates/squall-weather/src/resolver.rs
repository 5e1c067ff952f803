//! Request orchestration: admission, cache, breaker, upstream, stale fallback.

use std::sync::Arc;

use squall_core::{Clock, Config};

use crate::breaker::{BreakerSettings, CircuitBreaker};
use crate::cache::{CacheEntry, CacheStore};
use crate::metrics::MetricsSink;
use crate::provider::{WeatherProvider, WeatherSource};
use crate::rate_limit::FixedWindowLimiter;
use crate::types::{FreshSource, LookupKey, Outcome, UpstreamFailure, UpstreamResult, WeatherError};

/// How long cached entries may be served, with and without upstream contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshnessPolicy {
    pub fresh_ttl_seconds: f64,
    pub max_stale_seconds: f64,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            fresh_ttl_seconds: 300.0,
            max_stale_seconds: 1800.0,
        }
    }
}

impl FreshnessPolicy {
    pub fn new(fresh_ttl_seconds: u64, max_stale_seconds: u64) -> Self {
        Self {
            fresh_ttl_seconds: fresh_ttl_seconds as f64,
            max_stale_seconds: max_stale_seconds as f64,
        }
    }

    pub fn is_fresh(&self, age: f64) -> bool {
        age <= self.fresh_ttl_seconds
    }

    pub fn within_stale_budget(&self, age: f64) -> bool {
        age <= self.max_stale_seconds
    }

    /// Backend TTL for new entries. Freshness is judged from `fetched_at`, so
    /// the backend must keep entries for the whole stale budget.
    pub fn retention_seconds(&self) -> u64 {
        self.fresh_ttl_seconds.max(self.max_stale_seconds).ceil() as u64
    }
}

pub struct Resolver {
    limiter: Arc<FixedWindowLimiter>,
    cache: Arc<CacheStore>,
    breaker: Arc<CircuitBreaker>,
    source: Arc<dyn WeatherSource>,
    policy: FreshnessPolicy,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("limiter", &self.limiter)
            .field("cache", &self.cache)
            .field("breaker", &self.breaker)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(
        limiter: Arc<FixedWindowLimiter>,
        cache: Arc<CacheStore>,
        breaker: Arc<CircuitBreaker>,
        source: Arc<dyn WeatherSource>,
        policy: FreshnessPolicy,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            limiter,
            cache,
            breaker,
            source,
            policy,
            clock,
            metrics,
        }
    }

    /// Resolve one lookup.
    ///
    /// 1. Admission: over quota is `RateLimited`, before any cache or upstream work.
    /// 2. A fresh cache entry is served without touching the breaker.
    /// 3. An open breaker serves stale data or `CircuitOpenUnavailable`.
    /// 4. Otherwise fetch; success is cached and served, failure falls back to
    ///    stale data or `UpstreamUnavailable`.
    ///
    /// An entry older than `max_stale_seconds` is never served.
    pub async fn resolve(&self, key: &LookupKey) -> Outcome {
        if !self.admit() {
            return Outcome::RateLimited;
        }
        self.resolve_admitted(key).await
    }

    /// Take one slot from the rate limiter. A refusal is logged and counted.
    ///
    /// Callers that check their own preconditions between admission and
    /// lookup pair this with [`Resolver::resolve_admitted`].
    pub fn admit(&self) -> bool {
        if self.limiter.allow() {
            return true;
        }
        tracing::info!("Rate limit exceeded");
        self.metrics.rate_limited();
        false
    }

    /// Steps 2 to 4 of [`Resolver::resolve`] for an already admitted lookup.
    pub async fn resolve_admitted(&self, key: &LookupKey) -> Outcome {
        let cache_key = key.cache_key();
        let cached = self.cache.get(&cache_key).await;

        if let Some(entry) = &cached {
            let age = entry.age(self.clock.now());
            if self.policy.is_fresh(age) {
                tracing::debug!(location = key.location(), age, "Serving fresh cache entry");
                return Outcome::Fresh {
                    payload: entry.payload.clone(),
                    source: FreshSource::Cache,
                };
            }
        }

        if !self.breaker.allow() {
            self.metrics.circuit_open_rejected();
            return self.stale_or(key, cached, Outcome::CircuitOpenUnavailable);
        }

        match self.source.fetch(key).await {
            UpstreamResult::Success(report) => {
                let payload = report.into_payload();
                let entry = CacheEntry::new(payload.clone(), self.clock.now());
                self.cache
                    .set(&cache_key, &entry, self.policy.retention_seconds())
                    .await;
                Outcome::Fresh {
                    payload,
                    source: FreshSource::Api,
                }
            }
            // The breaker opened between our check and the fetch
            UpstreamResult::FatalFailure {
                cause: UpstreamFailure::CircuitOpen,
                ..
            } => {
                self.metrics.circuit_open_rejected();
                self.stale_or(key, cached, Outcome::CircuitOpenUnavailable)
            }
            UpstreamResult::RetryableFailure(_) | UpstreamResult::FatalFailure { .. } => {
                self.stale_or(key, cached, Outcome::UpstreamUnavailable)
            }
        }
    }

    /// Serve `cached` as stale if it is within budget, else `unavailable`.
    fn stale_or(&self, key: &LookupKey, cached: Option<CacheEntry>, unavailable: Outcome) -> Outcome {
        let Some(entry) = cached else {
            return unavailable;
        };

        let age = entry.age(self.clock.now());
        if !self.policy.within_stale_budget(age) {
            tracing::info!(
                location = key.location(),
                age,
                max_stale = self.policy.max_stale_seconds,
                "Cached entry too old to serve"
            );
            return unavailable;
        }

        tracing::info!(location = key.location(), age, "Serving stale cache entry");
        self.metrics.stale_served();
        Outcome::Stale {
            payload: entry.payload,
            age_seconds: age,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<FixedWindowLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }
}

/// Wire up the full resilience stack from configuration.
pub async fn build_resolver(
    config: &Config,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Resolver, WeatherError> {
    let breaker = Arc::new(CircuitBreaker::new(
        BreakerSettings::from(&config.breaker),
        clock.clone(),
    ));
    let provider = WeatherProvider::new(&config.upstream, breaker.clone(), metrics.clone())?;
    let cache = CacheStore::from_config(&config.cache, clock.clone(), metrics.clone()).await;
    let limiter = FixedWindowLimiter::from_quota(config.rate_limit.quota(), clock.clone());

    tracing::info!(
        rate_limit = %config.rate_limit.quota(),
        fresh_ttl = config.cache.fresh_ttl_seconds,
        max_stale = config.cache.max_stale_seconds,
        "Resolver ready"
    );

    Ok(Resolver::new(
        Arc::new(limiter),
        Arc::new(cache),
        breaker,
        Arc::new(provider),
        FreshnessPolicy::new(config.cache.fresh_ttl_seconds, config.cache.max_stale_seconds),
        clock,
        metrics,
    ))
}
