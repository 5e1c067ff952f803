//! Router tests driven through `tower::ServiceExt::oneshot`, with wiremock
//! standing in for the weather provider.

use std::io::Write;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use squall_core::{Config, ManualClock};
use squall_server::{router, AppState, PrometheusMetrics};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEATHER_PATH: &str = "/data/2.5/weather";

fn current_weather() -> Value {
    serde_json::json!({
        "weather": [{"description": "broken clouds"}],
        "main": {"temp": 17.5, "humidity": 63},
        "wind": {"speed": 5.7}
    })
}

async fn app_with(mock_server: &MockServer, configure: impl FnOnce(&mut Config)) -> (AppState, Router) {
    let mut config = Config::default();
    config.upstream.base_url = format!("{}{}", mock_server.uri(), WEATHER_PATH);
    config.upstream.api_key = "test-key".to_string();
    config.upstream.backoff_base_ms = 1;
    config.upstream.backoff_max_ms = 2;
    configure(&mut config);

    let metrics = Arc::new(PrometheusMetrics::new().unwrap());
    let clock = Arc::new(ManualClock::new(1_700_000_000.0));
    let resolver = squall_weather::build_resolver(&config, clock, metrics.clone())
        .await
        .unwrap();
    let state = AppState::new(Arc::new(resolver), metrics, config.upstream.has_api_key());
    (state.clone(), router(state))
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_root_and_health() {
    let mock_server = MockServer::start().await;
    let (state, app) = app_with(&mock_server, |_| {}).await;

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({"service": "squall"}));

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));

    state.shutdown.cancel();
    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await, serde_json::json!({"status": "shutting_down"}));
}

#[tokio::test]
async fn test_weather_from_api_then_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(WEATHER_PATH))
        .and(query_param("q", "new york"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_weather()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_, app) = app_with(&mock_server, |_| {}).await;

    let response = get(&app, "/weather/New%20York").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["source"], "api");
    assert_eq!(body["temperature"], 17.5);
    assert_eq!(body["humidity"], 63);
    assert_eq!(body["wind_speed"], 5.7);
    assert_eq!(body["conditions"], "broken clouds");

    let response = get(&app, "/weather/new%20york").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["source"], "cache");
}

#[tokio::test]
async fn test_blank_location_is_rejected() {
    let mock_server = MockServer::start().await;
    let (_, app) = app_with(&mock_server, |_| {}).await;

    let response = get(&app, "/weather/%20%20").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "invalid_location");
}

#[tokio::test]
async fn test_missing_api_key_is_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&mock_server).await;

    let (_, app) = app_with(&mock_server, |config| config.upstream.api_key = String::new()).await;

    let response = get(&app, "/weather/london").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_rate_limited_lookup() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(WEATHER_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_weather()))
        .mount(&mock_server)
        .await;

    let (_, app) = app_with(&mock_server, |config| config.rate_limit.weather = "1/60".to_string()).await;

    assert_eq!(get(&app, "/weather/rome").await.status(), StatusCode::OK);

    let response = get(&app, "/weather/rome").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(response).await["detail"], "rate_limited");
}

#[tokio::test]
async fn test_rate_limit_checked_before_api_key() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&mock_server).await;

    let (_, app) = app_with(&mock_server, |config| {
        config.upstream.api_key = String::new();
        config.rate_limit.weather = "1/60".to_string();
    })
    .await;

    assert_eq!(get(&app, "/weather/oslo").await.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = get(&app, "/weather/oslo").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(response).await["detail"], "rate_limited");
}

#[tokio::test]
async fn test_upstream_outage_maps_to_503() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(WEATHER_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let (_, app) = app_with(&mock_server, |config| config.breaker.failure_threshold = 1).await;

    let response = get(&app, "/weather/athens").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["detail"], "upstream_unavailable");

    let response = get(&app, "/weather/athens").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["detail"], "upstream_circuit_open");
}

#[tokio::test]
async fn test_request_id_echoed_and_forwarded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(WEATHER_PATH))
        .and(header("x-request-id", "trace-me-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_weather()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (_, app) = app_with(&mock_server, |_| {}).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/weather/dublin")
                .header("x-request-id", "trace-me-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "trace-me-7");
}

#[tokio::test]
async fn test_request_id_generated_when_absent() {
    let mock_server = MockServer::start().await;
    let (_, app) = app_with(&mock_server, |_| {}).await;

    let response = get(&app, "/health").await;
    let id = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(id.len(), 36);
}

#[tokio::test]
async fn test_metrics_endpoint_reports_traffic() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(WEATHER_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(current_weather()))
        .mount(&mock_server)
        .await;

    let (_, app) = app_with(&mock_server, |_| {}).await;
    get(&app, "/weather/kyiv").await;
    get(&app, "/weather/kyiv").await;

    let response = get(&app, "/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;

    assert!(text.contains(r#"http_requests_total{method="GET",path="/weather/{location}",status="200"} 2"#));
    assert!(text.contains("weather_requests_total 2"));
    assert!(text.contains(r#"weather_cache_hits_total{tier="memory"} 1"#));
    assert!(text.contains(r#"weather_cache_misses_total{tier="memory"} 1"#));
    assert!(text.contains(r#"openweather_requests_total{result="ok"} 1"#));
}

/// Log sink shared between the subscriber and the test body.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().clone()).unwrap()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_one_lifecycle_record_per_request() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let mock_server = MockServer::start().await;
    let (_, app) = app_with(&mock_server, |_| {}).await;
    assert_eq!(get(&app, "/health").await.status(), StatusCode::OK);

    let text = logs.text();
    assert_eq!(text.matches("Request completed").count(), 1, "{}", text);
    assert!(!text.contains("processing request"), "{}", text);
}
