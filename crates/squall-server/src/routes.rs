//! HTTP handlers.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use squall_weather::{LookupKey, Outcome};

use crate::metrics::CONTENT_TYPE;
use crate::state::AppState;

pub const SERVICE_NAME: &str = "squall";

pub async fn root() -> Json<Value> {
    Json(json!({ "service": SERVICE_NAME }))
}

pub async fn health(State(state): State<AppState>) -> Response {
    if state.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "shutting_down" }))).into_response();
    }
    Json(json!({ "status": "ok" })).into_response()
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

pub async fn weather(State(state): State<AppState>, Path(location): Path<String>) -> Response {
    state.metrics.weather_request();

    let Some(key) = LookupKey::new(&location) else {
        return detail(StatusCode::BAD_REQUEST, "invalid_location");
    };

    if !state.resolver.admit() {
        return outcome_response(Outcome::RateLimited);
    }

    if !state.api_key_configured {
        tracing::error!("Weather lookup refused: provider API key not configured");
        return detail(StatusCode::INTERNAL_SERVER_ERROR, "OPENWEATHER_API_KEY not set");
    }

    let outcome = state.resolver.resolve_admitted(&key).await;
    tracing::debug!(location = key.location(), outcome = outcome.label(), "Lookup resolved");
    outcome_response(outcome)
}

/// Map a resolver outcome onto status and body.
///
/// Served payloads gain a `source` field; stale ones also carry `age_seconds`.
pub fn outcome_response(outcome: Outcome) -> Response {
    let status = StatusCode::from_u16(outcome.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let label = outcome.label();

    match outcome {
        Outcome::Fresh { mut payload, .. } => {
            payload.insert("source".to_string(), Value::from(label));
            (status, Json(Value::Object(payload))).into_response()
        }
        Outcome::Stale {
            mut payload,
            age_seconds,
        } => {
            payload.insert("source".to_string(), Value::from(label));
            payload.insert("age_seconds".to_string(), Value::from(age_seconds.round() as u64));
            (status, Json(Value::Object(payload))).into_response()
        }
        Outcome::RateLimited | Outcome::CircuitOpenUnavailable | Outcome::UpstreamUnavailable => {
            detail(status, label)
        }
    }
}

fn detail(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use squall_weather::{FreshSource, Payload};

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn payload() -> Payload {
        let mut payload = Payload::new();
        payload.insert("temperature".into(), json!(3.5));
        payload
    }

    #[tokio::test]
    async fn test_fresh_response_carries_source() {
        let response = outcome_response(Outcome::Fresh {
            payload: payload(),
            source: FreshSource::Api,
        });
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"temperature": 3.5, "source": "api"}));
    }

    #[tokio::test]
    async fn test_stale_response_carries_age() {
        let response = outcome_response(Outcome::Stale {
            payload: payload(),
            age_seconds: 912.4,
        });
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"temperature": 3.5, "source": "stale", "age_seconds": 912})
        );
    }

    #[tokio::test]
    async fn test_unavailable_responses() {
        let response = outcome_response(Outcome::RateLimited);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(response).await, json!({"detail": "rate_limited"}));

        let response = outcome_response(Outcome::CircuitOpenUnavailable);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await, json!({"detail": "upstream_circuit_open"}));

        let response = outcome_response(Outcome::UpstreamUnavailable);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await, json!({"detail": "upstream_unavailable"}));
    }
}
