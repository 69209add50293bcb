//! Per-session webhook models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::parse_string_list;

/// Webhook stored in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Webhook {
    pub id: String,
    pub session_id: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    /// JSON array of event tokens; empty means all events
    pub events: String,
    pub enabled: i32,
    pub created_at: String,
    pub updated_at: String,
}

impl Webhook {
    pub fn event_list(&self) -> Vec<String> {
        parse_string_list(&self.events)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled != 0
    }
}

/// Response DTO for Webhook (never echoes a caller-supplied secret)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub id: String,
    pub session_id: String,
    pub url: String,
    pub events: Vec<String>,
    pub enabled: bool,
    pub has_secret: bool,
    /// Only set on the response that created the webhook with a generated secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Webhook> for WebhookResponse {
    fn from(webhook: Webhook) -> Self {
        let events = webhook.event_list();
        Self {
            id: webhook.id,
            session_id: webhook.session_id,
            url: webhook.url,
            events,
            enabled: webhook.enabled != 0,
            has_secret: webhook.secret.is_some(),
            secret: None,
            created_at: webhook.created_at,
            updated_at: webhook.updated_at,
        }
    }
}

/// Request to create or replace the webhook of a session
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpsertWebhookRequest {
    pub url: String,
    /// Absent keeps the current filter on update and means "all events" on create
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}
