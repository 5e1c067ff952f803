//! Upstream client for the provider's current-weather endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use squall_core::request_context::{current_request_id, REQUEST_ID_HEADER};
use squall_core::UpstreamConfig;
use url::Url;

use crate::breaker::CircuitBreaker;
use crate::metrics::MetricsSink;
use crate::retry::{classify_error, classify_status, run_with_retry, RetryPolicy};
use crate::types::{LookupKey, UpstreamFailure, UpstreamResult, WeatherError, WeatherReport};

/// Something that can fetch a report for a location.
///
/// The resolver depends on this seam rather than on HTTP directly.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, key: &LookupKey) -> UpstreamResult;
}

// Subset of the provider response we read.
#[derive(Debug, Deserialize)]
struct RawCurrent {
    main: RawMain,
    wind: RawWind,
    weather: Vec<RawCondition>,
}

#[derive(Debug, Deserialize)]
struct RawMain {
    temp: f64,
    humidity: i64,
}

#[derive(Debug, Deserialize)]
struct RawWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    description: String,
}

/// Parse a provider body into a report. Anything missing or mistyped is `Malformed`.
pub fn normalize(body: &[u8]) -> Result<WeatherReport, UpstreamFailure> {
    let raw: RawCurrent =
        serde_json::from_slice(body).map_err(|e| UpstreamFailure::Malformed(e.to_string()))?;

    let conditions = raw
        .weather
        .into_iter()
        .next()
        .map(|c| c.description)
        .ok_or_else(|| UpstreamFailure::Malformed("empty weather array".to_string()))?;

    Ok(WeatherReport {
        temperature: raw.main.temp,
        humidity: raw.main.humidity,
        wind_speed: raw.wind.speed,
        conditions,
    })
}

/// HTTP client with bounded retry, reporting terminal outcomes to the breaker.
pub struct WeatherProvider {
    client: Client,
    base_url: Url,
    api_key: String,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for WeatherProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherProvider")
            .field("base_url", &self.base_url.as_str())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl WeatherProvider {
    pub fn new(
        config: &UpstreamConfig,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, WeatherError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("squall/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(&config.base_url)?,
            api_key: config.api_key.clone(),
            retry: RetryPolicy::from_config(config),
            breaker,
            metrics,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// One HTTP round trip, timed and reported.
    async fn attempt(&self, key: &LookupKey, attempt: u32) -> Result<WeatherReport, UpstreamFailure> {
        let started = Instant::now();
        let result = self.send(key).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => {
                self.metrics.upstream_attempt("ok", elapsed);
                tracing::debug!(location = key.location(), attempt, ?elapsed, "Upstream attempt succeeded");
            }
            Err(failure) => {
                self.metrics.upstream_attempt(failure.metric_label(), elapsed);
                tracing::debug!(location = key.location(), attempt, ?elapsed, "Upstream attempt failed: {}", failure);
            }
        }
        result
    }

    async fn send(&self, key: &LookupKey) -> Result<WeatherReport, UpstreamFailure> {
        let mut request = self.client.get(self.base_url.clone()).query(&[
            ("q", key.location()),
            ("appid", self.api_key.as_str()),
            ("units", "metric"),
        ]);
        if let Some(request_id) = current_request_id() {
            request = request.header(REQUEST_ID_HEADER, request_id);
        }

        let response = request.send().await.map_err(classify_error)?;
        if let Some(failure) = classify_status(response.status()) {
            return Err(failure);
        }

        let body = response.bytes().await.map_err(classify_error)?;
        normalize(&body)
    }
}

#[async_trait]
impl WeatherSource for WeatherProvider {
    async fn fetch(&self, key: &LookupKey) -> UpstreamResult {
        if !self.breaker.allow() {
            tracing::debug!(location = key.location(), "Circuit open, skipping upstream");
            return UpstreamResult::circuit_open();
        }

        match run_with_retry(&self.retry, |attempt| self.attempt(key, attempt)).await {
            Ok(report) => {
                self.breaker.record_success();
                UpstreamResult::Success(report)
            }
            Err(failure) => {
                tracing::warn!(location = key.location(), "Upstream fetch failed: {}", failure);
                if self.breaker.record_failure() {
                    self.metrics.breaker_opened();
                }
                UpstreamResult::from_failure(failure)
            }
        }
    }
}
