//! A live device connection and the task that consumes its events.
//!
//! Library callbacks hand events to the session's loop through a bounded
//! channel without blocking. The loop is the only writer of QR state; it
//! persists every transition, publishes a snapshot for waiters, and forwards
//! translated events to the webhook dispatcher in library order.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use super::translate::{translate, Translation};
use crate::api::metrics::{record_session_event, record_session_event_dropped};
use crate::db::{now_rfc3339, DeviceStore, Session, SessionStatus, SessionStore, StatusUpdate};
use crate::error::Result;
use crate::webhook::{DispatchSender, EventType, WebhookEvent};
use crate::whatsapp::{ClientEvent, EventHandler, WhatsAppClient};

pub const QR_EXPIRED: &str = "qr expired";

/// Point-in-time view of a live session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub qr_code: Option<String>,
    pub qr_expires_at: Option<DateTime<Utc>>,
    pub device_jid: Option<String>,
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self {
            status: session.status_enum(),
            qr_code: session.qr_code.clone(),
            qr_expires_at: session
                .qr_code_expires_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            device_jid: session.device_jid.clone(),
        }
    }
}

/// Shared collaborators of every session loop
#[derive(Clone)]
pub struct LoopContext {
    pub sessions: SessionStore,
    pub devices: DeviceStore,
    pub dispatch: DispatchSender,
    pub qr_lifetime: Duration,
    pub event_buffer: usize,
}

pub struct LiveClient {
    session_id: String,
    client: Arc<dyn WhatsAppClient>,
    state: watch::Sender<SessionSnapshot>,
    closing: Arc<AtomicBool>,
    close: Arc<Notify>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveClient {
    /// Subscribe to `client` and start the session's event loop
    pub fn start(
        session: &Session,
        client: Arc<dyn WhatsAppClient>,
        ctx: LoopContext,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionSnapshot::from(session));
        let (tx, rx) = mpsc::channel(ctx.event_buffer.max(1));
        let closing = Arc::new(AtomicBool::new(false));
        let close = Arc::new(Notify::new());

        client.subscribe(handoff(session.id.clone(), tx));

        let live = Arc::new(Self {
            session_id: session.id.clone(),
            client: client.clone(),
            state: state.clone(),
            closing: closing.clone(),
            close: close.clone(),
            task: Mutex::new(None),
        });

        let event_loop = EventLoop {
            session_id: session.id.clone(),
            client,
            ctx,
            state,
            closing,
            // A stored `connected` row may predate this client; only the
            // loop's own transitions count
            connected_announced: false,
        };
        let handle = tokio::spawn(event_loop.run(rx, close));
        *live.task.lock() = Some(handle);

        live
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn client(&self) -> &Arc<dyn WhatsAppClient> {
        &self.client
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Publish a row written outside the loop
    pub fn publish(&self, session: &Session) {
        self.state.send_replace(SessionSnapshot::from(session));
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Wait until `pred` holds for the snapshot, or `timeout` elapses.
    ///
    /// Returns the last snapshot seen either way.
    pub async fn wait_for<F>(&self, timeout: Duration, pred: F) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        let mut rx = self.state.subscribe();
        let seen = match tokio::time::timeout(timeout, rx.wait_for(|s| pred(s))).await {
            Ok(Ok(snapshot)) => snapshot.clone(),
            _ => self.snapshot(),
        };
        seen
    }

    /// Tear down the connection and stop the loop.
    ///
    /// Library `Disconnected` and `Qr` events raised while closing are
    /// ignored; other queued events are still delivered. Close errors are
    /// logged, never returned.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);

        if let Err(e) = self.client.disconnect().await {
            tracing::warn!(session_id = %self.session_id, error = %e, "Library close failed");
        }
        self.close.notify_one();

        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), &mut handle).await.is_err() {
                tracing::warn!(session_id = %self.session_id, "Event loop did not stop in time");
                handle.abort();
            }
        }
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

/// Non-blocking bridge from library callbacks into the loop.
///
/// When the loop falls behind, the newest event is dropped and counted.
fn handoff(session_id: String, tx: mpsc::Sender<ClientEvent>) -> EventHandler {
    Arc::new(move |event: ClientEvent| match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            record_session_event_dropped("overflow");
            tracing::warn!(
                session_id = %session_id,
                kind = %event.kind(),
                "Session event buffer full, dropping event"
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    })
}

struct EventLoop {
    session_id: String,
    client: Arc<dyn WhatsAppClient>,
    ctx: LoopContext,
    state: watch::Sender<SessionSnapshot>,
    closing: Arc<AtomicBool>,
    connected_announced: bool,
}

impl EventLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<ClientEvent>, close: Arc<Notify>) {
        tracing::debug!(session_id = %self.session_id, "Session event loop started");

        loop {
            let expiry = self.qr_deadline();

            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = close.notified() => {
                    while let Ok(event) = rx.try_recv() {
                        self.handle(event).await;
                    }
                    break;
                }
                _ = sleep_until(expiry) => self.expire_qr().await,
            }
        }

        tracing::debug!(session_id = %self.session_id, "Session event loop stopped");
    }

    fn closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn qr_deadline(&self) -> Option<DateTime<Utc>> {
        let snapshot = self.state.borrow();
        if snapshot.status == SessionStatus::QrCode {
            snapshot.qr_expires_at
        } else {
            None
        }
    }

    async fn handle(&mut self, event: ClientEvent) {
        if let Err(e) = self.apply(&event).await {
            tracing::error!(
                session_id = %self.session_id,
                kind = %event.kind(),
                error = %e,
                "Failed to apply session event"
            );
        }
    }

    async fn apply(&mut self, event: &ClientEvent) -> Result<()> {
        match event {
            ClientEvent::Qr { code, timeout } => {
                if self.closing() {
                    return Ok(());
                }
                let lifetime = if timeout.is_zero() {
                    self.ctx.qr_lifetime
                } else {
                    *timeout
                };
                let expires_at = Utc::now()
                    + chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::seconds(60));
                let expires = expires_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

                if !self.ctx.sessions.update_qr(&self.session_id, code, &expires).await? {
                    tracing::debug!(session_id = %self.session_id, "Ignoring QR code outside of pairing");
                    return Ok(());
                }
                self.state.send_modify(|s| {
                    s.status = SessionStatus::QrCode;
                    s.qr_code = Some(code.clone());
                    s.qr_expires_at = Some(expires_at);
                });

                tracing::info!(session_id = %self.session_id, expires_at = %expires, "QR code issued");
                self.emit(
                    EventType::QRCode,
                    serde_json::json!({ "qrCode": code, "expiresAt": expires }),
                )
                .await;
            }
            ClientEvent::PairSuccess { jid, .. } => {
                let now = now_rfc3339();
                let row = self
                    .ctx
                    .sessions
                    .update_status(
                        &self.session_id,
                        StatusUpdate::new(SessionStatus::Connected)
                            .device_jid(jid.clone())
                            .connected_at(now.clone())
                            .last_seen(now),
                    )
                    .await?;
                self.publish(&row);

                tracing::info!(session_id = %self.session_id, jid = %jid, "Device paired");
                self.forward(event).await;
                if !self.connected_announced {
                    self.connected_announced = true;
                    self.emit(EventType::Connected, serde_json::json!({ "jid": jid })).await;
                }
            }
            ClientEvent::Connected => {
                if self.connected_announced {
                    return Ok(());
                }
                let jid = self
                    .client
                    .device_jid()
                    .or_else(|| self.state.borrow().device_jid.clone());
                let Some(jid) = jid else {
                    self.fail("connected without a device identity").await?;
                    return Ok(());
                };

                let now = now_rfc3339();
                let row = self
                    .ctx
                    .sessions
                    .update_status(
                        &self.session_id,
                        StatusUpdate::new(SessionStatus::Connected)
                            .device_jid(jid.clone())
                            .connected_at(now.clone())
                            .last_seen(now),
                    )
                    .await?;
                self.publish(&row);
                self.connected_announced = true;

                tracing::info!(session_id = %self.session_id, jid = %jid, "Session connected");
                self.emit(EventType::Connected, serde_json::json!({ "jid": jid })).await;
            }
            ClientEvent::Disconnected => {
                if self.closing() {
                    return Ok(());
                }
                let row = self
                    .ctx
                    .sessions
                    .update_status(
                        &self.session_id,
                        StatusUpdate::new(SessionStatus::Disconnected)
                            .last_seen(now_rfc3339())
                            .clear_qr(),
                    )
                    .await?;
                self.publish(&row);
                self.connected_announced = false;

                tracing::info!(session_id = %self.session_id, "Session disconnected by library");
                self.forward(event).await;
            }
            ClientEvent::LoggedOut { reason, .. } => {
                self.ctx.devices.delete(&self.session_id).await?;
                let row = self
                    .ctx
                    .sessions
                    .update_status(
                        &self.session_id,
                        StatusUpdate::new(SessionStatus::Disconnected)
                            .clear_device_jid()
                            .clear_qr()
                            .last_seen(now_rfc3339()),
                    )
                    .await?;
                self.publish(&row);
                self.connected_announced = false;

                tracing::warn!(session_id = %self.session_id, reason = %reason, "Device logged out");
                self.forward(event).await;
            }
            ClientEvent::PairError { message } | ClientEvent::StreamError { message } => {
                self.fail(message).await?;
            }
            _ => self.forward(event).await,
        }

        Ok(())
    }

    /// Record a library failure; raises no user event
    async fn fail(&mut self, message: &str) -> Result<()> {
        let row = self
            .ctx
            .sessions
            .update_status(&self.session_id, StatusUpdate::new(SessionStatus::Error).error(message))
            .await?;
        self.publish(&row);
        self.connected_announced = false;
        tracing::warn!(session_id = %self.session_id, error = %message, "Session error");
        Ok(())
    }

    async fn expire_qr(&mut self) {
        // The manager may have moved the session on while the timer was armed
        match self.qr_deadline() {
            Some(at) if at <= Utc::now() => {}
            _ => return,
        }

        let row = match self
            .ctx
            .sessions
            .update_status(
                &self.session_id,
                StatusUpdate::new(SessionStatus::Error).error(QR_EXPIRED),
            )
            .await
        {
            Ok(row) => row,
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "Failed to expire QR code");
                // Stop re-arming the timer for this code
                self.state.send_modify(|s| s.status = SessionStatus::Error);
                return;
            }
        };
        self.publish(&row);
        tracing::info!(session_id = %self.session_id, "QR code expired");
    }

    fn publish(&self, row: &Session) {
        self.state.send_replace(SessionSnapshot::from(row));
    }

    /// Translate and dispatch a library event
    async fn forward(&self, event: &ClientEvent) {
        match translate(event) {
            Translation::Event(event_type, data) => self.emit(event_type, data).await,
            Translation::Internal => {}
            Translation::Unknown(kind) => {
                record_session_event_dropped("unknown");
                tracing::debug!(session_id = %self.session_id, kind = %kind, "Dropping unmapped library event");
            }
        }
    }

    async fn emit(&self, event_type: EventType, data: serde_json::Value) {
        record_session_event(event_type.as_str());
        let event = WebhookEvent::new(self.session_id.clone(), event_type, data);
        if self.ctx.dispatch.send(event).await.is_err() {
            tracing::debug!(session_id = %self.session_id, "Webhook dispatcher is gone");
        }
    }
}

async fn sleep_until(deadline: Option<DateTime<Utc>>) {
    match deadline {
        Some(at) => {
            let remaining = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(remaining).await;
        }
        None => std::future::pending::<()>().await,
    }
}
