//! Webhook configuration rules and the per-session upsert flow.

use rand::Rng;
use std::collections::HashSet;
use url::{Host, Url};

use super::events::{is_known_token, EventType, ALL_EVENTS};
use crate::db::{now_rfc3339, SessionStore, UpsertWebhookRequest, Webhook, WebhookStore};
use crate::error::{GatewayError, Result};

const MAX_URL_LEN: usize = 2048;
const MIN_SECRET_LEN: usize = 16;

/// Validate a webhook target URL
pub fn validate_url(raw: &str, allow_loopback: bool) -> Result<()> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(GatewayError::invalid("url", "URL is required"));
    }
    if raw.len() > MAX_URL_LEN {
        return Err(GatewayError::invalid(
            "url",
            format!("URL is too long (max {} characters)", MAX_URL_LEN),
        ));
    }

    let url = Url::parse(raw).map_err(|e| GatewayError::invalid("url", format!("invalid URL: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(GatewayError::invalid("url", "scheme must be http or https"));
    }

    let host = match url.host() {
        Some(Host::Domain(d)) if d.is_empty() => None,
        other => other,
    };
    let Some(host) = host else {
        return Err(GatewayError::invalid("url", "URL must include a host"));
    };

    if !allow_loopback && is_loopback(&host) {
        return Err(GatewayError::invalid("url", "loopback addresses are not allowed"));
    }

    Ok(())
}

fn is_loopback(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(d) => {
            let d = d.to_ascii_lowercase();
            d == "localhost" || d.ends_with(".localhost")
        }
        Host::Ipv4(ip) => ip.is_loopback(),
        Host::Ipv6(ip) => ip.is_loopback(),
    }
}

/// Validate an event filter; an empty list subscribes to everything
pub fn validate_events(events: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for event in events {
        if !is_known_token(event) {
            return Err(GatewayError::invalid("events", format!("unknown event type: {}", event)));
        }
        if !seen.insert(event.as_str()) {
            return Err(GatewayError::invalid("events", format!("duplicate event type: {}", event)));
        }
    }
    Ok(())
}

pub fn validate_secret(secret: &str) -> Result<()> {
    if secret.chars().count() < MIN_SECRET_LEN {
        return Err(GatewayError::invalid(
            "secret",
            format!("secret must be at least {} characters", MIN_SECRET_LEN),
        ));
    }
    Ok(())
}

/// Validate every field of an upsert request without touching storage
pub fn validate_request(req: &UpsertWebhookRequest, allow_loopback: bool) -> Result<()> {
    validate_url(&req.url, allow_loopback)?;
    if let Some(events) = &req.events {
        validate_events(events)?;
    }
    if let Some(secret) = &req.secret {
        validate_secret(secret)?;
    }
    Ok(())
}

/// Whether `webhook` wants deliveries of `event`
pub fn has_event(webhook: &Webhook, event: EventType) -> bool {
    if !webhook.is_enabled() {
        return false;
    }
    let events = webhook.event_list();
    events.is_empty() || events.iter().any(|e| e == ALL_EVENTS || e == event.as_str())
}

/// 32 random bytes, hex encoded
pub fn generate_secret() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Per-session webhook configuration backed by the webhook store
#[derive(Clone)]
pub struct WebhookService {
    webhooks: WebhookStore,
    sessions: SessionStore,
    allow_loopback: bool,
}

impl WebhookService {
    pub fn new(webhooks: WebhookStore, sessions: SessionStore, allow_loopback: bool) -> Self {
        Self {
            webhooks,
            sessions,
            allow_loopback,
        }
    }

    pub fn allow_loopback(&self) -> bool {
        self.allow_loopback
    }

    pub fn store(&self) -> &WebhookStore {
        &self.webhooks
    }

    /// Create or replace the webhook of a session
    pub async fn upsert(&self, session_id: &str, req: UpsertWebhookRequest) -> Result<Webhook> {
        validate_request(&req, self.allow_loopback)?;
        self.sessions.get_by_id(session_id).await?;

        let events_json = match &req.events {
            Some(events) => Some(serde_json::to_string(events)?),
            None => None,
        };
        let now = now_rfc3339();

        match self.webhooks.get_by_session_id(session_id).await? {
            Some(mut webhook) => {
                webhook.url = req.url.trim().to_string();
                if let Some(events) = events_json {
                    webhook.events = events;
                }
                if let Some(secret) = req.secret {
                    webhook.secret = Some(secret);
                }
                if let Some(enabled) = req.enabled {
                    webhook.enabled = enabled as i32;
                }
                webhook.updated_at = now;

                self.webhooks.update(&webhook).await?;
                tracing::info!(session_id = %session_id, webhook_id = %webhook.id, "Webhook updated");
                Ok(webhook)
            }
            None => {
                let webhook = Webhook {
                    id: uuid::Uuid::new_v4().to_string(),
                    session_id: session_id.to_string(),
                    url: req.url.trim().to_string(),
                    secret: Some(req.secret.unwrap_or_else(generate_secret)),
                    events: events_json.unwrap_or_else(|| "[]".to_string()),
                    enabled: req.enabled.unwrap_or(true) as i32,
                    created_at: now.clone(),
                    updated_at: now,
                };

                self.webhooks.create(&webhook).await?;
                tracing::info!(session_id = %session_id, webhook_id = %webhook.id, "Webhook created");
                Ok(webhook)
            }
        }
    }

    pub async fn get(&self, session_id: &str) -> Result<Webhook> {
        self.sessions.get_by_id(session_id).await?;
        self.webhooks
            .get_by_session_id(session_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("webhook for session {}", session_id)))
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.sessions.get_by_id(session_id).await?;
        if !self.webhooks.delete_by_session_id(session_id).await? {
            return Err(GatewayError::NotFound(format!("webhook for session {}", session_id)));
        }
        tracing::info!(session_id = %session_id, "Webhook deleted");
        Ok(())
    }
}
