//! Prometheus metrics.
//!
//! HTTP RED metrics plus the business counters reported by the resolver stack
//! through [`MetricsSink`]. Metrics live in an owned [`Registry`] so tests can
//! build as many instances as they like.

use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use squall_weather::MetricsSink;

/// Latency buckets (seconds), shared by HTTP and upstream histograms
const LATENCY_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.075, 0.1, 0.2, 0.3, 0.5, 0.75, 1.0, 1.5, 2.0, 3.0, 5.0,
];

/// Text exposition content type
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,

    /// labels: path, method, status
    http_requests_total: IntCounterVec,
    /// labels: path, method
    http_request_duration_seconds: HistogramVec,

    weather_requests_total: IntCounter,
    /// labels: tier
    cache_hits_total: IntCounterVec,
    /// labels: tier
    cache_misses_total: IntCounterVec,
    /// labels: tier, op
    cache_errors_total: IntCounterVec,
    stale_served_total: IntCounter,

    /// labels: result (ok | error | timeout | malformed | circuit_open)
    upstream_requests_total: IntCounterVec,
    upstream_request_duration_seconds: Histogram,
    breaker_opened_total: IntCounter,

    rate_limited_total: IntCounter,
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let metric = IntCounter::new(name, help)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<IntCounterVec> {
    let metric = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl PrometheusMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["path", "method"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let upstream_request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "openweather_request_duration_seconds",
                "Upstream provider latency in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(upstream_request_duration_seconds.clone()))?;

        Ok(Self {
            http_requests_total: counter_vec(
                &registry,
                "http_requests_total",
                "Total HTTP requests",
                &["path", "method", "status"],
            )?,
            http_request_duration_seconds,
            weather_requests_total: counter(&registry, "weather_requests_total", "Total weather requests")?,
            cache_hits_total: counter_vec(&registry, "weather_cache_hits_total", "Weather cache hits", &["tier"])?,
            cache_misses_total: counter_vec(
                &registry,
                "weather_cache_misses_total",
                "Weather cache misses",
                &["tier"],
            )?,
            cache_errors_total: counter_vec(
                &registry,
                "weather_cache_errors_total",
                "Weather cache backend errors",
                &["tier", "op"],
            )?,
            stale_served_total: counter(
                &registry,
                "weather_stale_served_total",
                "Requests served with stale cached data",
            )?,
            upstream_requests_total: counter_vec(
                &registry,
                "openweather_requests_total",
                "Upstream provider requests",
                &["result"],
            )?,
            upstream_request_duration_seconds,
            breaker_opened_total: counter(
                &registry,
                "openweather_circuit_open_total",
                "Circuit breaker opened events",
            )?,
            rate_limited_total: counter(
                &registry,
                "rate_limited_requests_total",
                "Requests rejected due to rate limiting",
            )?,
            registry,
        })
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[path, method, status.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[path, method])
            .observe(duration.as_secs_f64());
    }

    pub fn weather_request(&self) {
        self.weather_requests_total.inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

impl MetricsSink for PrometheusMetrics {
    fn cache_hit(&self, tier: &str) {
        self.cache_hits_total.with_label_values(&[tier]).inc();
    }

    fn cache_miss(&self, tier: &str) {
        self.cache_misses_total.with_label_values(&[tier]).inc();
    }

    fn cache_error(&self, tier: &str, op: &str) {
        self.cache_errors_total.with_label_values(&[tier, op]).inc();
    }

    fn upstream_attempt(&self, result: &str, duration: Duration) {
        self.upstream_requests_total.with_label_values(&[result]).inc();
        self.upstream_request_duration_seconds
            .observe(duration.as_secs_f64());
    }

    fn breaker_opened(&self) {
        self.breaker_opened_total.inc();
    }

    fn circuit_open_rejected(&self) {
        self.upstream_requests_total
            .with_label_values(&["circuit_open"])
            .inc();
    }

    fn rate_limited(&self) {
        self.rate_limited_total.inc();
    }

    fn stale_served(&self) {
        self.stale_served_total.inc();
    }
}
