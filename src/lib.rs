pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod session;
pub mod webhook;
pub mod whatsapp;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::session::SessionManager;
use crate::webhook::WebhookService;

pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionManager>,
    pub webhooks: WebhookService,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: Config,
        sessions: Arc<SessionManager>,
        webhooks: WebhookService,
    ) -> Self {
        Self {
            config,
            sessions,
            webhooks,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
