use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{UpsertWebhookRequest, WebhookResponse};
use crate::error::GatewayError;
use crate::webhook::{catalog, EventCatalog};
use crate::AppState;

use super::response::{ApiResponse, ApiResult};
use super::validation::validate_uuid;

fn session_id(id: &str) -> Result<(), GatewayError> {
    validate_uuid(id, "session id").map_err(|_| GatewayError::session_not_found(id))
}

/// POST /sessions/:id/webhooks
///
/// The response to a create that generated the secret is the only place
/// that secret is ever returned.
pub async fn upsert_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<UpsertWebhookRequest>, JsonRejection>,
) -> ApiResult<WebhookResponse> {
    session_id(&id)?;
    let Json(req) = body?;

    let existed = state.webhooks.store().get_by_session_id(&id).await?.is_some();
    let reveal_secret = !existed && req.secret.is_none();

    let webhook = state.webhooks.upsert(&id, req).await?;
    let secret = reveal_secret.then(|| webhook.secret.clone()).flatten();

    let mut response = WebhookResponse::from(webhook);
    response.secret = secret;
    Ok(ApiResponse::ok(response))
}

/// GET /sessions/:id/webhooks
pub async fn get_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<WebhookResponse> {
    session_id(&id)?;
    let webhook = state.webhooks.get(&id).await?;
    Ok(ApiResponse::ok(webhook.into()))
}

/// DELETE /sessions/:id/webhooks
pub async fn delete_webhook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    session_id(&id)?;
    state.webhooks.delete(&id).await?;
    Ok(ApiResponse::ok(json!({ "sessionId": id, "deleted": true })))
}

/// GET /webhooks/events
pub async fn list_events() -> ApiResult<EventCatalog> {
    Ok(ApiResponse::ok(catalog()))
}
