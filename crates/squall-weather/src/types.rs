use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque cached payload: field name to scalar.
pub type Payload = serde_json::Map<String, Value>;

/// Normalized current conditions extracted from a provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub temperature: f64,
    pub humidity: i64,
    pub wind_speed: f64,
    pub conditions: String,
}

impl WeatherReport {
    pub fn into_payload(self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("temperature".to_string(), Value::from(self.temperature));
        payload.insert("conditions".to_string(), Value::from(self.conditions));
        payload.insert("humidity".to_string(), Value::from(self.humidity));
        payload.insert("wind_speed".to_string(), Value::from(self.wind_speed));
        payload
    }
}

/// Normalized lookup key: trimmed, case-folded location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    location: String,
}

impl LookupKey {
    /// Returns `None` for a blank location.
    pub fn new(raw: &str) -> Option<Self> {
        let location = raw.trim().to_lowercase();
        if location.is_empty() {
            return None;
        }
        Some(Self { location })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn cache_key(&self) -> String {
        format!("weather:{}", self.location)
    }
}

/// Why an upstream fetch did not produce a report
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamFailure {
    #[error("Upstream request timed out")]
    Timeout,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream returned status {0}")]
    Status(u16),
    #[error("Malformed upstream response: {0}")]
    Malformed(String),
    #[error("Invalid upstream request: {0}")]
    InvalidRequest(String),
    #[error("Circuit breaker is open")]
    CircuitOpen,
}

impl UpstreamFailure {
    /// Transient failures: timeouts, transport errors, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status(code) => *code >= 500 || *code == 429,
            Self::Malformed(_) | Self::InvalidRequest(_) | Self::CircuitOpen => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }

    /// Label for the upstream request counter
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport(_) | Self::Status(_) | Self::InvalidRequest(_) => "error",
            Self::Malformed(_) => "malformed",
            Self::CircuitOpen => "circuit_open",
        }
    }
}

/// Terminal result of one upstream fetch (after retries)
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamResult {
    Success(WeatherReport),
    RetryableFailure(UpstreamFailure),
    FatalFailure {
        cause: UpstreamFailure,
        status_code: Option<u16>,
    },
}

impl UpstreamResult {
    pub fn from_failure(cause: UpstreamFailure) -> Self {
        if cause.is_retryable() {
            Self::RetryableFailure(cause)
        } else {
            Self::FatalFailure {
                status_code: cause.status_code(),
                cause,
            }
        }
    }

    pub fn circuit_open() -> Self {
        Self::from_failure(UpstreamFailure::CircuitOpen)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Where a fresh payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshSource {
    Cache,
    Api,
}

impl FreshSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Api => "api",
        }
    }
}

/// Result of resolving one lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Fresh { payload: Payload, source: FreshSource },
    Stale { payload: Payload, age_seconds: f64 },
    RateLimited,
    CircuitOpenUnavailable,
    UpstreamUnavailable,
}

impl Outcome {
    /// HTTP status the shell should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Fresh { .. } | Self::Stale { .. } => 200,
            Self::RateLimited => 429,
            Self::CircuitOpenUnavailable | Self::UpstreamUnavailable => 503,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Fresh { source, .. } => source.as_str(),
            Self::Stale { .. } => "stale",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpenUnavailable => "upstream_circuit_open",
            Self::UpstreamUnavailable => "upstream_unavailable",
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Fresh { payload, .. } | Self::Stale { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

/// Weather provider construction errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
