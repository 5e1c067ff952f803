use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::error::ConfigError;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "SQUALL_CONFIG";

/// Legacy variable for the provider credential, honored when the config
/// leaves `upstream.api_key` empty.
pub const API_KEY_ENV: &str = "OPENWEATHER_API_KEY";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP shell listens on
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Weather provider settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Current-weather endpoint of the provider
    pub base_url: String,

    /// Provider credential, sent as the `appid` query parameter
    pub api_key: String,

    /// Per-attempt timeout
    pub timeout_ms: u64,

    /// Total attempts per fetch, including the first
    pub max_attempts: u32,

    /// First backoff step; doubles per retry
    pub backoff_base_ms: u64,

    /// Backoff ceiling
    pub backoff_max_ms: u64,
}

impl UpstreamConfig {
    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

// Hand-written so the credential never lands in logs.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.has_api_key() { "<redacted>" } else { "<unset>" })
            .field("timeout_ms", &self.timeout_ms)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("backoff_max_ms", &self.backoff_max_ms)
            .finish()
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openweathermap.org/data/2.5/weather".to_string(),
            api_key: String::new(),
            timeout_ms: 2000,
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries younger than this are served without contacting the provider
    pub fresh_ttl_seconds: u64,

    /// Absolute ceiling on the age of anything served as stale
    pub max_stale_seconds: u64,

    /// Capacity of the in-process tier
    pub memory_max_entries: usize,

    /// Remote tier; the in-process tier is used alone when unset
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_ttl_seconds: 300,
            max_stale_seconds: 1800,
            memory_max_entries: 10_000,
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub window_seconds: u64,
    pub open_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_seconds: 60,
            open_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Quota as "<requests>/<seconds>", e.g. "50/60"
    pub weather: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            weather: RateQuota::default().to_string(),
        }
    }
}

impl RateLimitConfig {
    /// Parsed quota, falling back to the default when the string is malformed.
    pub fn quota(&self) -> RateQuota {
        match self.weather.parse() {
            Ok(quota) => quota,
            Err(e) => {
                tracing::warn!("Ignoring rate_limit.weather ({}), using default", e);
                RateQuota::default()
            }
        }
    }
}

/// Fixed-window admission quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub requests: u64,
    pub window_seconds: u64,
}

impl Default for RateQuota {
    fn default() -> Self {
        Self {
            requests: 50,
            window_seconds: 60,
        }
    }
}

impl std::fmt::Display for RateQuota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.requests, self.window_seconds)
    }
}

impl FromStr for RateQuota {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Invalid(format!("rate limit must be <requests>/<seconds>, got {:?}", s));

        let (requests, window) = s.trim().split_once('/').ok_or_else(invalid)?;
        let requests: u64 = requests.trim().parse().map_err(|_| invalid())?;
        let window_seconds: u64 = window.trim().parse().map_err(|_| invalid())?;
        if requests == 0 || window_seconds == 0 {
            return Err(invalid());
        }

        Ok(Self {
            requests,
            window_seconds,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the config file (if any), then
    /// `SQUALL__SECTION__FIELD` environment overrides.
    ///
    /// An explicitly requested file must exist; the per-user default file is optional.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = ::config::Config::try_from(&Config::default())?;
        let mut builder = ::config::Config::builder().add_source(defaults);

        match Self::resolve_path(explicit_path) {
            Some((path, required)) => {
                if required && !path.exists() {
                    return Err(ConfigError::NotFound(path.display().to_string()));
                }
                tracing::debug!("Loading config from {}", path.display());
                builder = builder.add_source(::config::File::from(path).required(required));
            }
            None => tracing::debug!("No config file found, using defaults"),
        }

        let mut loaded: Config = builder
            .add_source(
                ::config::Environment::with_prefix("SQUALL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if !loaded.upstream.has_api_key() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                loaded.upstream.api_key = key;
            }
        }

        Ok(loaded)
    }

    /// Which file to read and whether it must exist.
    fn resolve_path(explicit_path: Option<&Path>) -> Option<(PathBuf, bool)> {
        if let Some(path) = explicit_path {
            return Some((path.to_path_buf(), true));
        }
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Some((PathBuf::from(path), true));
        }
        dirs::config_dir()
            .map(|dir| dir.join("squall").join("config.toml"))
            .filter(|path| path.exists())
            .map(|path| (path, false))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.server.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            result.add_error(
                "server.bind_addr",
                format!("Not a socket address: {}", self.server.bind_addr),
            );
        }

        self.validate_url(&self.upstream.base_url, "upstream.base_url", &mut result);

        // Missing key is served as a 500 per request rather than refusing to start
        if !self.upstream.has_api_key() {
            result.add_warning(
                "upstream.api_key",
                format!("Provider API key not set (set {} or upstream.api_key)", API_KEY_ENV),
            );
        }

        if self.upstream.timeout_ms == 0 {
            result.add_error("upstream.timeout_ms", "Timeout must be greater than 0");
        }
        if self.upstream.max_attempts == 0 {
            result.add_error("upstream.max_attempts", "At least one attempt is required");
        } else if self.upstream.max_attempts > 10 {
            result.add_warning("upstream.max_attempts", "More than 10 attempts per fetch");
        }
        if self.upstream.backoff_base_ms > self.upstream.backoff_max_ms {
            result.add_error(
                "upstream.backoff_base_ms",
                "Backoff base must not exceed backoff_max_ms",
            );
        }

        if self.cache.fresh_ttl_seconds == 0 {
            result.add_warning("cache.fresh_ttl_seconds", "Fresh TTL of 0 disables cache hits");
        }
        if self.cache.max_stale_seconds < self.cache.fresh_ttl_seconds {
            result.add_warning(
                "cache.max_stale_seconds",
                "Stale budget is shorter than the fresh TTL; stale fallback can never apply",
            );
        }
        if self.cache.memory_max_entries == 0 {
            result.add_error("cache.memory_max_entries", "Capacity must be greater than 0");
        }
        if let Some(redis_url) = &self.cache.redis_url {
            match Url::parse(redis_url) {
                Ok(url) if url.scheme() == "redis" || url.scheme() == "rediss" => {}
                Ok(url) => result.add_error(
                    "cache.redis_url",
                    format!("URL must use redis or rediss scheme, got: {}", url.scheme()),
                ),
                Err(e) => result.add_error("cache.redis_url", format!("Invalid URL: {}", e)),
            }
        }

        if self.breaker.failure_threshold == 0 {
            result.add_error("breaker.failure_threshold", "Threshold must be greater than 0");
        }
        if self.breaker.window_seconds == 0 {
            result.add_error("breaker.window_seconds", "Window must be greater than 0");
        }
        if self.breaker.open_seconds == 0 {
            result.add_warning("breaker.open_seconds", "Breaker will never stay open");
        }

        if let Err(e) = self.rate_limit.weather.parse::<RateQuota>() {
            result.add_error("rate_limit.weather", e.to_string());
        }

        if is_unknown_level(&self.logging.level) {
            result.add_warning(
                "logging.level",
                format!("Unrecognized level {:?}; RUST_LOG syntax is also accepted", self.logging.level),
            );
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }
                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }
}

fn is_unknown_level(level: &str) -> bool {
    !matches!(
        level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    ) && !level.contains('=')
}
