//! Bounded retry with exponential backoff for upstream calls.
//!
//! Retried:
//! - Timeouts
//! - Transport errors (connection refused, reset)
//! - 5xx and 429 responses
//!
//! Not retried:
//! - Other 4xx responses (including 408, 401, 404)
//! - Bodies that do not normalize into a report

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use squall_core::UpstreamConfig;
use tokio::time::Instant;

use crate::types::UpstreamFailure;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_MAX_DELAY_MS: u64 = 2000;
pub const DEFAULT_MAX_ELAPSED_MS: u64 = 10_000;

/// Retry schedule for one fetch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Ceiling of the first backoff (doubles per retry)
    pub base_delay: Duration,
    /// Cap on any single backoff
    pub max_delay: Duration,
    /// Equal jitter: sleep uniformly in [ceiling/2, ceiling]
    pub jitter: bool,
    /// Give up rather than start a sleep that would overrun this budget
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: true,
            max_elapsed: Some(Duration::from_millis(DEFAULT_MAX_ELAPSED_MS)),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            ..Self::default()
        }
    }

    /// Deterministic schedule, used by tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// `min(max_delay, base_delay * 2^retry)` for the zero-based retry index.
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry);
        if !self.jitter {
            return ceiling;
        }

        let ceiling_ms = ceiling.as_millis() as u64;
        let floor_ms = ceiling_ms / 2;
        if ceiling_ms == floor_ms {
            return ceiling;
        }
        Duration::from_millis(rand::rng().random_range(floor_ms..=ceiling_ms))
    }
}

/// Map a non-success HTTP status to a failure. `None` for 2xx.
pub fn classify_status(status: StatusCode) -> Option<UpstreamFailure> {
    if status.is_success() {
        return None;
    }
    Some(UpstreamFailure::Status(status.as_u16()))
}

/// Map a transport-level reqwest error to a failure.
///
/// The request URL is stripped first: it carries the API key.
pub fn classify_error(error: reqwest::Error) -> UpstreamFailure {
    let error = error.without_url();
    if error.is_timeout() {
        return UpstreamFailure::Timeout;
    }
    if error.is_builder() {
        return UpstreamFailure::InvalidRequest(error.to_string());
    }
    if error.is_decode() {
        return UpstreamFailure::Malformed(error.to_string());
    }
    if let Some(status) = error.status() {
        return UpstreamFailure::Status(status.as_u16());
    }
    UpstreamFailure::Transport(error.to_string())
}

/// Run `operation` until it succeeds, fails fatally, or the policy is spent.
///
/// The closure receives the one-based attempt number. The last failure is
/// returned when attempts run out or the next sleep would overrun
/// `max_elapsed`.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, UpstreamFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UpstreamFailure>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let failure = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("Upstream call succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(failure) => failure,
        };

        if !failure.is_retryable() {
            tracing::debug!("Non-retryable upstream failure: {}", failure);
            return Err(failure);
        }

        if attempt >= max_attempts {
            tracing::warn!("All {} upstream attempts exhausted: {}", max_attempts, failure);
            return Err(failure);
        }

        let delay = policy.delay_for_retry(attempt - 1);
        if let Some(budget) = policy.max_elapsed {
            if started.elapsed() + delay > budget {
                tracing::warn!(
                    "Abandoning retries after {} attempts, next backoff {:?} exceeds budget {:?}",
                    attempt,
                    delay,
                    budget
                );
                return Err(failure);
            }
        }

        tracing::warn!(
            "Retryable upstream failure on attempt {} of {}: {} (waiting {:?})",
            attempt,
            max_attempts,
            failure,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
            max_elapsed: None,
        }
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.max_delay, Duration::from_millis(2000));
        assert!(policy.jitter);
    }

    #[test]
    fn test_from_config() {
        let config = UpstreamConfig {
            max_attempts: 5,
            backoff_base_ms: 50,
            backoff_max_ms: 400,
            ..UpstreamConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
        assert_eq!(policy.max_delay, Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_ceiling_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ceiling(0), Duration::from_millis(200));
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(400));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(800));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_millis(1600));
        assert_eq!(policy.backoff_ceiling(4), Duration::from_millis(2000));
        assert_eq!(policy.backoff_ceiling(40), Duration::from_millis(2000));
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let policy = RetryPolicy::default();
        for retry in 0..6 {
            let ceiling = policy.backoff_ceiling(retry);
            for _ in 0..50 {
                let delay = policy.delay_for_retry(retry);
                assert!(delay >= ceiling / 2, "{:?} below half of {:?}", delay, ceiling);
                assert!(delay <= ceiling, "{:?} above {:?}", delay, ceiling);
            }
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(UpstreamFailure::Status(503))
        );
        assert!(classify_status(StatusCode::BAD_GATEWAY).is_some_and(|f| f.is_retryable()));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).is_some_and(|f| f.is_retryable()));
        assert!(classify_status(StatusCode::NOT_FOUND).is_some_and(|f| !f.is_retryable()));
        assert!(classify_status(StatusCode::UNAUTHORIZED).is_some_and(|f| !f.is_retryable()));
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT).is_some_and(|f| !f.is_retryable()));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = run_with_retry(&fast_policy(3), move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(UpstreamFailure::Status(503))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = run_with_retry(&fast_policy(3), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(UpstreamFailure::Status(404)) }
        })
        .await;

        assert_eq!(result, Err(UpstreamFailure::Status(404)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = run_with_retry(&fast_policy(3), move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 3 {
                    Err(UpstreamFailure::Timeout)
                } else {
                    Err(UpstreamFailure::Status(500))
                }
            }
        })
        .await;

        assert_eq!(result, Err(UpstreamFailure::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_elapsed_budget_abandons_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            jitter: false,
            max_elapsed: Some(Duration::from_secs(1)),
        };

        let result: Result<(), _> = run_with_retry(&policy, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(UpstreamFailure::Transport("connection reset".into())) }
        })
        .await;

        assert!(matches!(result, Err(UpstreamFailure::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
