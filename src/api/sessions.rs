use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    CreateSessionRequest, ListSessionsQuery, ListSessionsResponse, PairPhoneRequest,
    PairPhoneResponse, QrCodeResponse, SessionResponse,
};
use crate::error::GatewayError;
use crate::AppState;

use super::error::ApiError;
use super::response::{ApiResponse, ApiResult};
use super::validation::validate_uuid;

/// Session ids are UUIDs; anything else cannot name a session
fn session_id(id: &str) -> Result<(), ApiError> {
    validate_uuid(id, "session id").map_err(|_| GatewayError::session_not_found(id).into())
}

/// POST /sessions/create
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> ApiResult<SessionResponse> {
    let Json(req) = body?;
    let session = state.sessions.create(req).await?;
    Ok(ApiResponse::created(session))
}

/// GET /sessions/list
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListSessionsQuery>, QueryRejection>,
) -> ApiResult<ListSessionsResponse> {
    let Query(query) = query?;
    let page = state.sessions.list(query.limit, query.offset).await?;
    Ok(ApiResponse::ok(page))
}

/// GET /sessions/:id/info
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SessionResponse> {
    session_id(&id)?;
    Ok(ApiResponse::ok(state.sessions.get(&id).await?))
}

/// POST /sessions/:id/connect
pub async fn connect_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SessionResponse> {
    session_id(&id)?;
    Ok(ApiResponse::ok(state.sessions.connect(&id).await?))
}

/// POST /sessions/:id/disconnect
pub async fn disconnect_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SessionResponse> {
    session_id(&id)?;
    Ok(ApiResponse::ok(state.sessions.disconnect(&id).await?))
}

/// POST /sessions/:id/logout
pub async fn logout_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SessionResponse> {
    session_id(&id)?;
    Ok(ApiResponse::ok(state.sessions.logout(&id).await?))
}

/// DELETE /sessions/:id/delete
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    session_id(&id)?;
    state.sessions.delete(&id).await?;
    Ok(ApiResponse::ok(json!({ "id": id, "deleted": true })))
}

/// GET /sessions/:id/qr
pub async fn get_qr(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<QrCodeResponse> {
    session_id(&id)?;
    Ok(ApiResponse::ok(state.sessions.get_qr(&id).await?))
}

/// POST /sessions/:id/qr/refresh
pub async fn refresh_qr(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<QrCodeResponse> {
    session_id(&id)?;
    Ok(ApiResponse::ok(state.sessions.refresh_qr(&id).await?))
}

/// POST /sessions/:id/pair
pub async fn pair_phone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<PairPhoneRequest>, JsonRejection>,
) -> ApiResult<PairPhoneResponse> {
    session_id(&id)?;
    let Json(req) = body?;
    let linking_code = state.sessions.pair_phone(&id, &req.phone).await?;
    Ok(ApiResponse::ok(PairPhoneResponse { linking_code }))
}
