//! Centralized error types for startup and configuration.
//!
//! Request-path failures never surface as these: the resolver reports
//! outcomes, not errors. These cover the process lifecycle only.

use thiserror::Error;

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Short operator-facing hint printed alongside the error on startup failure.
    pub fn hint(&self) -> &'static str {
        match self {
            AppError::Config(e) => e.hint(),
            AppError::Bind { .. } => "Is another process listening on server.bind_addr?",
            AppError::HttpClient(_) => "Check upstream.base_url and TLS settings.",
            AppError::Metrics(_) => "Metric registration failed; this is a bug.",
            AppError::Io(_) => "A file or socket operation failed.",
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn hint(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "Pass --config or set SQUALL_CONFIG to an existing file.",
            ConfigError::Invalid(_) => "Fix the listed settings and restart.",
            ConfigError::ParseError(_) => "Configuration file or SQUALL__* variables are malformed.",
        }
    }
}

impl From<::config::ConfigError> for ConfigError {
    fn from(err: ::config::ConfigError) -> Self {
        match err {
            ::config::ConfigError::NotFound(key) => ConfigError::NotFound(key),
            other => ConfigError::ParseError(other.to_string()),
        }
    }
}
