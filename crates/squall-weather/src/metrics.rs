//! Observability hooks.
//!
//! Components report through [`MetricsSink`]; the HTTP shell plugs in a
//! Prometheus-backed implementation. Every method defaults to a no-op.

use std::time::Duration;

pub trait MetricsSink: Send + Sync {
    fn cache_hit(&self, _tier: &str) {}

    fn cache_miss(&self, _tier: &str) {}

    fn cache_error(&self, _tier: &str, _op: &str) {}

    /// One upstream HTTP attempt finished with `result` ("ok", "error", "timeout", "malformed").
    fn upstream_attempt(&self, _result: &str, _duration: Duration) {}

    fn breaker_opened(&self) {}

    /// A lookup was refused because the breaker was open.
    fn circuit_open_rejected(&self) {}

    fn rate_limited(&self) {}

    fn stale_served(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}
