pub mod auth;
pub mod error;
pub mod metrics;
pub mod response;
mod sessions;
pub mod validation;
mod webhooks;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Protected API routes
    let session_routes = Router::new()
        .route("/create", post(sessions::create_session))
        .route("/list", get(sessions::list_sessions))
        .route("/:id/info", get(sessions::get_session))
        .route("/:id/connect", post(sessions::connect_session))
        .route("/:id/disconnect", post(sessions::disconnect_session))
        .route("/:id/logout", post(sessions::logout_session))
        .route("/:id/delete", delete(sessions::delete_session))
        .route("/:id/qr", get(sessions::get_qr))
        .route("/:id/qr/refresh", post(sessions::refresh_qr))
        .route("/:id/pair", post(sessions::pair_phone))
        // Webhooks
        .route(
            "/:id/webhooks",
            post(webhooks::upsert_webhook)
                .get(webhooks::get_webhook)
                .delete(webhooks::delete_webhook),
        );

    let webhook_routes = Router::new().route("/events", get(webhooks::list_events));

    let protected = Router::new()
        .nest("/sessions", session_routes)
        .nest("/webhooks", webhook_routes)
        // Protected by auth
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .merge(protected)
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
