//! Resilience layer in front of the weather provider.
//!
//! A [`Resolver`] answers lookups by combining a fixed-window rate limiter,
//! a TTL cache with stale fallback, a windowed circuit breaker and a
//! bounded-retry upstream client.

pub mod breaker;
pub mod cache;
pub mod metrics;
pub mod provider;
pub mod rate_limit;
pub mod resolver;
pub mod retry;
pub mod types;

pub use breaker::{BreakerSettings, CircuitBreaker};
pub use cache::{CacheBackend, CacheEntry, CacheError, CacheStore, MemoryBackend, RedisBackend};
pub use metrics::{MetricsSink, NoopMetrics};
pub use provider::{WeatherProvider, WeatherSource};
pub use rate_limit::FixedWindowLimiter;
pub use resolver::{build_resolver, FreshnessPolicy, Resolver};
pub use retry::RetryPolicy;
pub use types::*;
