use std::sync::Arc;

use squall_weather::Resolver;
use tokio_util::sync::CancellationToken;

use crate::metrics::PrometheusMetrics;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
    pub metrics: Arc<PrometheusMetrics>,
    /// Cancelled once shutdown begins; health then reports 503
    pub shutdown: CancellationToken,
    /// Weather lookups answer 500 until a provider key is configured
    pub api_key_configured: bool,
}

impl AppState {
    pub fn new(resolver: Arc<Resolver>, metrics: Arc<PrometheusMetrics>, api_key_configured: bool) -> Self {
        Self {
            resolver,
            metrics,
            shutdown: CancellationToken::new(),
            api_key_configured,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
