pub mod clock;
pub mod config;
pub mod error;
pub mod request_context;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BreakerConfig, CacheConfig, Config, LoggingConfig, RateLimitConfig, RateQuota, ServerConfig,
    UpstreamConfig, ValidationResult,
};
pub use error::{AppError, ConfigError};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Targets that would otherwise log full upstream URLs (including the API key).
const QUIET_TARGETS: &str = "reqwest=warn,hyper=warn,hyper_util=warn";

/// Initialize tracing/logging.
///
/// `RUST_LOG` wins when set; otherwise the configured level is used.
pub fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("{},{}", logging.level, QUIET_TARGETS))
            .context("Invalid logging.level")?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!(level = %logging.level, json = logging.json, "Squall logging initialized");
    Ok(())
}
