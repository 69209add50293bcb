//! Prometheus exposition for the gateway.
//!
//! HTTP traffic is recorded by [`metrics_middleware`]; the dispatcher and
//! the session event loops record through the helpers at the bottom.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const WEBHOOK_DELIVERIES_TOTAL: &str = "webhook_deliveries_total";
pub const WEBHOOK_ATTEMPTS_TOTAL: &str = "webhook_attempts_total";
pub const SESSION_EVENTS_TOTAL: &str = "session_events_total";
pub const SESSION_EVENTS_DROPPED_TOTAL: &str = "session_events_dropped_total";
pub const SESSIONS_LIVE: &str = "sessions_live";

/// Install the global recorder. Call once, from `main`.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests received"
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        WEBHOOK_DELIVERIES_TOTAL,
        "Webhook deliveries by final outcome"
    );
    describe_counter!(
        WEBHOOK_ATTEMPTS_TOTAL,
        "Individual HTTP attempts made to webhook endpoints"
    );
    describe_counter!(
        SESSION_EVENTS_TOTAL,
        "Events emitted by sessions, by event type"
    );
    describe_counter!(
        SESSION_EVENTS_DROPPED_TOTAL,
        "Library events dropped before dispatch, by reason"
    );
    describe_gauge!(SESSIONS_LIVE, "Sessions holding a live device client");

    Ok(handle)
}

/// GET /metrics - Returns Prometheus-formatted metrics.
///
/// This endpoint is accessible without authentication.
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    set_sessions_live(state.sessions.live_count());

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Metrics not initialized".to_string(),
        ),
    }
}

/// Middleware to track HTTP request metrics.
///
/// Records:
/// - `http_requests_total` counter with method, path, and status labels
/// - `http_request_duration_seconds` histogram with method and path labels
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Use the matched route template so session ids don't explode cardinality
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

/// Record one HTTP attempt against a webhook endpoint.
pub fn record_webhook_attempt() {
    counter!(WEBHOOK_ATTEMPTS_TOTAL).increment(1);
}

/// Record the final outcome of a webhook delivery.
pub fn record_webhook_delivery(outcome: &'static str) {
    counter!(WEBHOOK_DELIVERIES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record an event handed to the dispatcher.
pub fn record_session_event(event_type: &'static str) {
    counter!(SESSION_EVENTS_TOTAL, "event_type" => event_type).increment(1);
}

/// Record a library event that never reached the dispatcher.
pub fn record_session_event_dropped(reason: &'static str) {
    counter!(SESSION_EVENTS_DROPPED_TOTAL, "reason" => reason).increment(1);
}

pub fn set_sessions_live(count: usize) {
    gauge!(SESSIONS_LIVE).set(count as f64);
}
