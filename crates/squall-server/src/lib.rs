//! HTTP shell around the weather resolver.
//!
//! Routes:
//! - `GET /`                   service name
//! - `GET /health`             liveness, 503 once shutdown has begun
//! - `GET /metrics`            Prometheus text exposition
//! - `GET /weather/:location`  resolved lookup

pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use metrics::PrometheusMetrics;
pub use state::AppState;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use squall_core::{AppError, Config, SystemClock};
use tokio_util::sync::CancellationToken;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/weather/:location", get(routes::weather))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::observe))
        .with_state(state)
}

/// Build the application state from configuration.
pub async fn build_state(config: &Config) -> Result<AppState, AppError> {
    let metrics = Arc::new(PrometheusMetrics::new().map_err(|e| AppError::Metrics(e.to_string()))?);
    let resolver = squall_weather::build_resolver(config, Arc::new(SystemClock), metrics.clone())
        .await
        .map_err(|e| AppError::HttpClient(e.to_string()))?;

    Ok(AppState::new(
        Arc::new(resolver),
        metrics,
        config.upstream.has_api_key(),
    ))
}

/// Bind, serve until a shutdown signal arrives, then drain in-flight requests.
pub async fn serve(config: &Config) -> Result<(), AppError> {
    let state = build_state(config).await?;
    let shutdown = state.shutdown.clone();

    let addr: SocketAddr = config.server.bind_addr.parse().map_err(|_| {
        AppError::Config(squall_core::ConfigError::Invalid(format!(
            "server.bind_addr is not a socket address: {}",
            config.server.bind_addr
        )))
    })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    tracing::info!(%addr, "Squall listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM, flipping `token` so health starts failing.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
    token.cancel();
}
