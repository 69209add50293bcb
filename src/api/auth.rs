use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::error::ApiError;
use crate::AppState;

/// Extract the API key from request headers.
///
/// `X-API-Key` wins over `Authorization: Bearer`.
fn extract_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(api_key) = headers.get("X-API-Key").and_then(|h| h.to_str().ok()) {
        return Some(api_key);
    }

    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Compare keys in constant time
fn key_matches(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();

    // Only compare if lengths match (constant-time check)
    expected.len() == provided.len() && expected.ct_eq(provided).into()
}

/// Auth middleware that validates the static API key
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authorized = extract_key(request.headers())
        .map(|key| key_matches(&state.config.auth.api_key, key))
        .unwrap_or(false);

    if !authorized {
        tracing::debug!(path = %request.uri().path(), "Rejected request without a valid API key");
        return ApiError::unauthorized("Missing or invalid API key").into_response();
    }

    next.run(request).await
}
