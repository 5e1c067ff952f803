//! Request correlation and RED metrics for every HTTP request.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use squall_core::request_context::{new_request_id, with_request_id, REQUEST_ID_HEADER};
use tracing::Instrument;

use crate::state::AppState;

/// Longest inbound request id we accept verbatim.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Bucket dynamic paths so metric labels stay low-cardinality.
pub fn metric_path(path: &str) -> &str {
    if path.starts_with("/weather/") {
        "/weather/{location}"
    } else {
        path
    }
}

/// Reuse the caller's request id when it is usable, else mint one.
fn request_id(request: &Request) -> String {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(new_request_id, str::to_string)
}

/// Correlation + observability middleware.
///
/// Scopes the request id for the handler (so the upstream client forwards
/// it), echoes it on the response, and records request count and latency.
pub async fn observe(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let id = request_id(&request);

    let span = tracing::info_span!(
        "http_request",
        request_id = %id,
        http.method = %method,
        http.route = metric_path(&path),
    );

    let mut response = with_request_id(id.clone(), next.run(request))
        .instrument(span)
        .await;

    let status = response.status();
    let duration = start.elapsed();
    state
        .metrics
        .record_http_request(method.as_str(), metric_path(&path), status.as_u16(), duration);

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    tracing::info!(
        request_id = %id,
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}
