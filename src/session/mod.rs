//! Session lifecycle: creation, pairing, connection management and restore.
//!
//! The manager owns the registry of live clients. Every public operation
//! reads and writes the session store first; live state is then driven
//! through the client and observed via its loop's snapshot with a bounded
//! wait.

mod live;
pub mod translate;

pub use live::{LiveClient, LoopContext, SessionSnapshot, QR_EXPIRED};

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

use crate::api::metrics::set_sessions_live;
use crate::api::validation::{normalize_phone, validate_proxy, validate_session_name};
use crate::config::SessionsConfig;
use crate::db::{
    now_rfc3339, serialize_proxy, CreateSessionRequest, DeviceStore, ListSessionsResponse,
    QrCodeResponse, Session, SessionResponse, SessionStatus, SessionStore, StatusUpdate,
};
use crate::error::{GatewayError, Result};
use crate::webhook::{domain, DispatchSender, EventType, WebhookEvent, WebhookService};
use crate::whatsapp::{ClientFactory, DeviceRef};

pub const MAX_LIST_LIMIT: i64 = 200;

/// Counts from a startup restore pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub resumed: usize,
    pub reset: usize,
    pub failed: usize,
}

pub struct SessionManager {
    sessions: SessionStore,
    devices: DeviceStore,
    webhooks: WebhookService,
    factory: Arc<dyn ClientFactory>,
    dispatch: DispatchSender,
    config: SessionsConfig,
    live: DashMap<String, Arc<LiveClient>>,
    /// Serializes client opens so one session never gets two clients
    opening: tokio::sync::Mutex<()>,
    /// Per-session guard held for the whole of a connect
    connecting: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SessionManager {
    pub fn new(
        sessions: SessionStore,
        devices: DeviceStore,
        webhooks: WebhookService,
        factory: Arc<dyn ClientFactory>,
        dispatch: DispatchSender,
        config: SessionsConfig,
    ) -> Self {
        Self {
            sessions,
            devices,
            webhooks,
            factory,
            dispatch,
            config,
            live: DashMap::new(),
            opening: tokio::sync::Mutex::new(()),
            connecting: DashMap::new(),
        }
    }

    pub fn driver_name(&self) -> &'static str {
        self.factory.name()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_client(&self, id: &str) -> Option<Arc<LiveClient>> {
        self.live.get(id).map(|entry| entry.value().clone())
    }

    fn loop_context(&self) -> LoopContext {
        LoopContext {
            sessions: self.sessions.clone(),
            devices: self.devices.clone(),
            dispatch: self.dispatch.clone(),
            qr_lifetime: self.config.qr_lifetime(),
            event_buffer: self.config.event_buffer,
        }
    }

    /// Live client for `session`, opening one when none is registered
    async fn ensure_live(&self, session: &Session) -> Result<Arc<LiveClient>> {
        if let Some(live) = self.live_client(&session.id) {
            return Ok(live);
        }

        let _opening = self.opening.lock().await;
        if let Some(live) = self.live_client(&session.id) {
            return Ok(live);
        }

        let client = self
            .factory
            .new_client(
                DeviceRef {
                    session_id: session.id.clone(),
                    store: self.devices.clone(),
                },
                session.proxy(),
            )
            .await?;

        let live = LiveClient::start(session, client, self.loop_context());
        self.live.insert(session.id.clone(), live.clone());
        set_sessions_live(self.live.len());
        Ok(live)
    }

    fn take_live(&self, id: &str) -> Option<Arc<LiveClient>> {
        let removed = self.live.remove(id).map(|(_, live)| live);
        set_sessions_live(self.live.len());
        removed
    }

    async fn raise(&self, id: &str, event_type: EventType, data: serde_json::Value) {
        crate::api::metrics::record_session_event(event_type.as_str());
        if self
            .dispatch
            .send(WebhookEvent::new(id, event_type, data))
            .await
            .is_err()
        {
            tracing::debug!(session_id = %id, "Webhook dispatcher is gone");
        }
    }

    /// Move the session into `connecting` and open the connection.
    ///
    /// A library failure leaves the session in `error` and is returned as
    /// `UpstreamUnavailable`.
    async fn begin_connect(&self, session: &Session) -> Result<Arc<LiveClient>> {
        let live = self.ensure_live(session).await?;
        let row = self
            .sessions
            .update_status(&session.id, StatusUpdate::new(SessionStatus::Connecting))
            .await?;
        live.publish(&row);

        if let Err(e) = live.client().connect().await {
            let message = e.to_string();
            tracing::warn!(session_id = %session.id, error = %message, "Connect failed");
            let row = self
                .sessions
                .update_status(
                    &session.id,
                    StatusUpdate::new(SessionStatus::Error).error(message.clone()),
                )
                .await?;
            live.publish(&row);
            return Err(match e {
                GatewayError::UpstreamUnavailable(_) => e,
                _ => GatewayError::UpstreamUnavailable(message),
            });
        }

        Ok(live)
    }

    pub async fn create(&self, req: CreateSessionRequest) -> Result<SessionResponse> {
        let name = validate_session_name(&req.name).map_err(|e| GatewayError::invalid("name", e))?;
        if let Some(proxy) = &req.proxy {
            validate_proxy(proxy).map_err(|e| GatewayError::invalid("proxy", e))?;
        }
        if let Some(webhook) = &req.webhook {
            domain::validate_request(webhook, self.webhooks.allow_loopback())?;
        }

        let now = now_rfc3339();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            status: SessionStatus::Disconnected.to_string(),
            device_jid: None,
            connection_error: None,
            qr_code: None,
            qr_code_expires_at: None,
            proxy_config: serialize_proxy(req.proxy.as_ref()),
            created_at: now.clone(),
            updated_at: now,
            connected_at: None,
            last_seen: None,
        };
        self.sessions.create(&session).await?;

        if let Some(webhook) = req.webhook {
            if let Err(e) = self.webhooks.upsert(&session.id, webhook).await {
                // Keep creation all-or-nothing
                if let Err(cleanup) = self.sessions.delete(&session.id).await {
                    tracing::error!(session_id = %session.id, error = %cleanup, "Failed to roll back session");
                }
                return Err(e);
            }
        }

        tracing::info!(session_id = %session.id, name = %session.name, "Session created");

        let live = self.ensure_live(&session).await?;
        if req.generate_qr {
            match self.begin_connect(&session).await {
                Ok(_) => {
                    live.wait_for(self.config.qr_wait(), |s| s.status != SessionStatus::Connecting)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "QR generation failed on create");
                }
            }
        }

        Ok(self.sessions.get_by_id(&session.id).await?.into())
    }

    pub async fn get(&self, id: &str) -> Result<SessionResponse> {
        Ok(self.sessions.get_by_id(id).await?.into())
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<ListSessionsResponse> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let offset = offset.max(0);

        let sessions = self
            .sessions
            .list(limit, offset)
            .await?
            .into_iter()
            .map(SessionResponse::summary)
            .collect();
        let total = self.sessions.count().await?;

        Ok(ListSessionsResponse {
            sessions,
            total,
            limit,
            offset,
        })
    }

    pub async fn connect(&self, id: &str) -> Result<SessionResponse> {
        let guard = self.connecting.entry(id.to_string()).or_default().clone();
        let _connecting = guard.lock().await;

        let session = self.sessions.get_by_id(id).await?;
        let live = self.live_client(id);

        match (session.status_enum(), &live) {
            (SessionStatus::Connected, Some(_)) => return Err(GatewayError::AlreadyConnected),
            (SessionStatus::Connecting | SessionStatus::QrCode, Some(_)) => {
                return Ok(session.into());
            }
            _ => {}
        }

        let live = self.begin_connect(&session).await?;
        live.wait_for(self.config.connect_wait(), |s| {
            s.status != SessionStatus::Connecting
        })
        .await;

        Ok(self.sessions.get_by_id(id).await?.into())
    }

    pub async fn disconnect(&self, id: &str) -> Result<SessionResponse> {
        let session = self.sessions.get_by_id(id).await?;
        if session.status_enum() == SessionStatus::Disconnected {
            return Err(GatewayError::NotConnected);
        }

        if let Some(live) = self.take_live(id) {
            live.close().await;
        }

        let row = self
            .sessions
            .update_status(
                id,
                StatusUpdate::new(SessionStatus::Disconnected)
                    .last_seen(now_rfc3339())
                    .clear_qr(),
            )
            .await?;
        tracing::info!(session_id = %id, "Session disconnected");
        self.raise(id, EventType::Disconnected, serde_json::json!({})).await;

        Ok(row.into())
    }

    pub async fn logout(&self, id: &str) -> Result<SessionResponse> {
        self.sessions.get_by_id(id).await?;

        if let Some(live) = self.take_live(id) {
            if let Err(e) = live.client().logout().await {
                tracing::warn!(session_id = %id, error = %e, "Library logout failed");
            }
            live.close().await;
        }
        self.devices.delete(id).await?;

        let row = self
            .sessions
            .update_status(
                id,
                StatusUpdate::new(SessionStatus::Disconnected)
                    .clear_device_jid()
                    .clear_qr()
                    .last_seen(now_rfc3339()),
            )
            .await?;
        tracing::info!(session_id = %id, "Session logged out");
        self.raise(
            id,
            EventType::LoggedOut,
            serde_json::json!({ "onConnect": false, "reason": "logout requested" }),
        )
        .await;

        Ok(row.into())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.get_by_id(id).await?;

        if let Some(live) = self.take_live(id) {
            live.close().await;
        }
        self.sessions.delete(id).await?;
        self.connecting.remove(id);

        tracing::info!(session_id = %id, "Session deleted");
        Ok(())
    }

    pub async fn get_qr(&self, id: &str) -> Result<QrCodeResponse> {
        let mut session = self.sessions.get_by_id(id).await?;

        if session.status_enum() == SessionStatus::Connecting {
            if let Some(live) = self.live_client(id) {
                live.wait_for(self.config.qr_wait(), |s| s.status != SessionStatus::Connecting)
                    .await;
                session = self.sessions.get_by_id(id).await?;
            }
        }

        qr_response(&session)
    }

    pub async fn refresh_qr(&self, id: &str) -> Result<QrCodeResponse> {
        let session = self.sessions.get_by_id(id).await?;
        if session.status_enum() == SessionStatus::Connected {
            return Err(GatewayError::AlreadyConnected);
        }

        let previous = session.qr_code.clone();
        let live = match self.live_client(id) {
            Some(live)
                if matches!(
                    live.snapshot().status,
                    SessionStatus::Connecting | SessionStatus::QrCode | SessionStatus::Error
                ) =>
            {
                let row = self
                    .sessions
                    .update_status(id, StatusUpdate::new(SessionStatus::Connecting))
                    .await?;
                live.publish(&row);
                match live.client().refresh_qr().await {
                    Ok(()) => live,
                    Err(e) => {
                        tracing::debug!(session_id = %id, error = %e, "No pairing in progress, reconnecting");
                        self.begin_connect(&session).await?
                    }
                }
            }
            _ => self.begin_connect(&session).await?,
        };

        let snapshot = live
            .wait_for(self.config.qr_wait(), |s| {
                s.status == SessionStatus::Connected
                    || (s.status == SessionStatus::QrCode && s.qr_code != previous)
            })
            .await;

        match snapshot.status {
            SessionStatus::Connected => Err(GatewayError::AlreadyConnected),
            SessionStatus::QrCode if snapshot.qr_code != previous => {
                qr_response(&self.sessions.get_by_id(id).await?)
            }
            _ => Err(GatewayError::Timeout("no new QR code from the device".to_string())),
        }
    }

    pub async fn pair_phone(&self, id: &str, phone: &str) -> Result<String> {
        let digits = normalize_phone(phone).map_err(|e| GatewayError::invalid("phone", e))?;
        let session = self.sessions.get_by_id(id).await?;
        if session.status_enum() == SessionStatus::Connected {
            return Err(GatewayError::AlreadyConnected);
        }

        let live = match self.live_client(id) {
            Some(live)
                if matches!(
                    live.snapshot().status,
                    SessionStatus::Connecting | SessionStatus::QrCode
                ) =>
            {
                live
            }
            _ => {
                let live = self.begin_connect(&session).await?;
                live.wait_for(self.config.qr_wait(), |s| s.status != SessionStatus::Connecting)
                    .await;
                live
            }
        };

        if live.snapshot().status == SessionStatus::Connected {
            return Err(GatewayError::AlreadyConnected);
        }

        let code = live.client().pair_phone(&digits).await.map_err(|e| match e {
            GatewayError::AlreadyConnected | GatewayError::PairingFailed(_) => e,
            other => GatewayError::PairingFailed(other.to_string()),
        })?;

        tracing::info!(session_id = %id, "Phone linking code issued");
        Ok(code)
    }

    /// Reopen every session whose device credentials survived a restart.
    ///
    /// Failures are recorded on the session row and never abort startup.
    pub async fn restore(&self) -> Result<RestoreSummary> {
        let mut summary = RestoreSummary::default();

        for session in self.sessions.list_all().await? {
            let has_credentials = match self.devices.exists(&session.id).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::error!(session_id = %session.id, error = %e, "Failed to read device credentials");
                    summary.failed += 1;
                    continue;
                }
            };

            if has_credentials {
                match self.begin_connect(&session).await {
                    Ok(_) => {
                        tracing::info!(session_id = %session.id, "Session restored");
                        summary.resumed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, error = %e, "Session restore failed");
                        if !matches!(e, GatewayError::UpstreamUnavailable(_)) {
                            let update =
                                StatusUpdate::new(SessionStatus::Error).error(e.to_string());
                            if let Err(e) = self.sessions.update_status(&session.id, update).await {
                                tracing::error!(session_id = %session.id, error = %e, "Failed to record restore failure");
                            }
                        }
                        summary.failed += 1;
                    }
                }
                continue;
            }

            let stale = matches!(
                session.status_enum(),
                SessionStatus::Connecting | SessionStatus::QrCode | SessionStatus::Connected
            ) || session.qr_code.is_some();
            if stale {
                let update = StatusUpdate::new(SessionStatus::Disconnected)
                    .clear_qr()
                    .clear_device_jid();
                match self.sessions.update_status(&session.id, update).await {
                    Ok(_) => summary.reset += 1,
                    Err(e) => {
                        tracing::error!(session_id = %session.id, error = %e, "Failed to reset session");
                        summary.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            resumed = summary.resumed,
            reset = summary.reset,
            failed = summary.failed,
            "Session restore complete"
        );
        Ok(summary)
    }

    /// Disconnect every live client without raising user events.
    ///
    /// Rows and credentials are kept for the next restore.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.live.iter().map(|e| e.key().clone()).collect();
        tracing::info!(count = ids.len(), "Disconnecting live sessions");

        for id in ids {
            let Some(live) = self.take_live(&id) else {
                continue;
            };
            live.close().await;

            let update = StatusUpdate::new(SessionStatus::Disconnected)
                .last_seen(now_rfc3339())
                .clear_qr();
            if let Err(e) = self.sessions.update_status(&id, update).await {
                tracing::warn!(session_id = %id, error = %e, "Failed to record shutdown state");
            }
        }
    }
}

fn qr_response(session: &Session) -> Result<QrCodeResponse> {
    match session.status_enum() {
        SessionStatus::Connected => return Err(GatewayError::AlreadyConnected),
        SessionStatus::QrCode | SessionStatus::Error => {}
        _ => return Err(GatewayError::QrNotAvailable),
    }

    let (Some(qr_code), Some(expires_at)) = (&session.qr_code, &session.qr_code_expires_at) else {
        return Err(GatewayError::QrNotAvailable);
    };

    let expired = chrono::DateTime::parse_from_rfc3339(expires_at)
        .map(|at| at.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(true);

    Ok(QrCodeResponse {
        qr_code: qr_code.clone(),
        expires_at: expires_at.clone(),
        expired,
    })
}
