//! Outbound webhook delivery.
//!
//! Session event loops push [`WebhookEvent`]s into a bounded queue. The
//! [`WebhookDispatcher`] drains it and runs every delivery on its own task,
//! with at most `workers` deliveries in flight. A delivery looks up the
//! session's webhook before every attempt, so deleting a session (or
//! disabling its webhook) drops pending retries.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};

use super::domain::has_event;
use super::events::EventType;
use super::signing::generate_signature;
use crate::api::metrics::{record_webhook_attempt, record_webhook_delivery};
use crate::config::WebhookConfig;
use crate::db::WebhookStore;

pub const HEADER_EVENT: &str = "X-Webhook-Event";
pub const HEADER_SESSION_ID: &str = "X-Session-ID";
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";

/// Event envelope, serialized as the POST body
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(session_id: impl Into<String>, event_type: EventType, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            session_id: session_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            data,
        }
    }

    /// Compact JSON body
    pub fn to_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Producer side of the dispatch queue
pub type DispatchSender = mpsc::Sender<WebhookEvent>;

pub fn dispatch_channel(capacity: usize) -> (DispatchSender, mpsc::Receiver<WebhookEvent>) {
    mpsc::channel(capacity.max(1))
}

/// One HTTP POST, fully prepared
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What came back from a single POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Status(u16),
    Transport(String),
}

/// Transport used to POST webhook bodies
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> AttemptResult;
}

/// Production sender on top of reqwest
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for ReqwestSender {
    async fn send(&self, request: OutboundRequest) -> AttemptResult {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        match builder.body(request.body).send().await {
            Ok(response) => AttemptResult::Status(response.status().as_u16()),
            Err(e) => AttemptResult::Transport(e.to_string()),
        }
    }
}

/// Waits between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Final result of one event's delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A 2xx was received
    Delivered { attempts: u32 },
    /// No webhook, disabled, or filtered out
    Dropped,
    /// The receiver answered 4xx; never retried
    ClientError { attempts: u32, status: u16 },
    /// Every attempt failed with 5xx or a transport error
    Exhausted { attempts: u32, last_error: String },
    /// Shutdown interrupted the retry schedule
    Cancelled { attempts: u32 },
}

impl DeliveryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Dropped => "dropped",
            Self::ClientError { .. } => "client_error",
            Self::Exhausted { .. } => "exhausted",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Dropped => 0,
            Self::Delivered { attempts }
            | Self::ClientError { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }
}

/// Delivers single events; cheap to clone into worker tasks
#[derive(Clone)]
pub struct Deliverer {
    store: WebhookStore,
    sender: Arc<dyn WebhookSender>,
    sleeper: Arc<dyn Sleeper>,
    retry_delays: Arc<Vec<Duration>>,
    user_agent: String,
    shutdown: watch::Receiver<bool>,
}

impl Deliverer {
    pub fn new(
        store: WebhookStore,
        sender: Arc<dyn WebhookSender>,
        sleeper: Arc<dyn Sleeper>,
        config: &WebhookConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut retry_delays = config.retry_delays();
        if retry_delays.is_empty() {
            retry_delays.push(Duration::ZERO);
        }

        Self {
            store,
            sender,
            sleeper,
            retry_delays: Arc::new(retry_delays),
            user_agent: config.user_agent.clone(),
            shutdown,
        }
    }

    pub async fn deliver(&self, event: &WebhookEvent) -> DeliveryOutcome {
        let body = match event.to_body() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(session_id = %event.session_id, error = %e, "Failed to serialize webhook event");
                return DeliveryOutcome::Dropped;
            }
        };

        let mut shutdown = self.shutdown.clone();
        let mut attempts = 0u32;
        let mut last_error = String::new();

        for delay in self.retry_delays.iter() {
            if *shutdown.borrow() {
                return DeliveryOutcome::Cancelled { attempts };
            }
            tokio::select! {
                _ = self.sleeper.sleep(*delay) => {}
                _ = shutdown_requested(&mut shutdown) => return DeliveryOutcome::Cancelled { attempts },
            }

            let webhook = match self.store.get_by_session_id(&event.session_id).await {
                Ok(Some(webhook)) => webhook,
                Ok(None) => return DeliveryOutcome::Dropped,
                Err(e) => {
                    tracing::warn!(session_id = %event.session_id, error = %e, "Webhook lookup failed");
                    last_error = e.to_string();
                    continue;
                }
            };
            if !has_event(&webhook, event.event_type) {
                return DeliveryOutcome::Dropped;
            }

            let mut headers = vec![
                ("Content-Type", "application/json".to_string()),
                ("User-Agent", self.user_agent.clone()),
                (HEADER_EVENT, event.event_type.to_string()),
                (HEADER_SESSION_ID, event.session_id.clone()),
                (HEADER_TIMESTAMP, event.timestamp.clone()),
            ];
            if let Some(secret) = webhook.secret.as_deref() {
                headers.push((HEADER_SIGNATURE, generate_signature(&body, secret)));
            }

            attempts += 1;
            record_webhook_attempt();

            let result = self
                .sender
                .send(OutboundRequest {
                    url: webhook.url.clone(),
                    headers,
                    body: body.clone(),
                })
                .await;

            match result {
                AttemptResult::Status(status) if (200..300).contains(&status) => {
                    return DeliveryOutcome::Delivered { attempts };
                }
                AttemptResult::Status(status) if (400..500).contains(&status) => {
                    return DeliveryOutcome::ClientError { attempts, status };
                }
                AttemptResult::Status(status) => {
                    last_error = format!("HTTP {}", status);
                }
                AttemptResult::Transport(e) => {
                    last_error = e;
                }
            }

            tracing::debug!(
                session_id = %event.session_id,
                event_type = %event.event_type,
                attempt = attempts,
                error = %last_error,
                "Webhook attempt failed"
            );
        }

        DeliveryOutcome::Exhausted { attempts, last_error }
    }
}

/// Resolves once shutdown is signalled; never resolves if the signal is gone
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drains the dispatch queue
pub struct WebhookDispatcher {
    deliverer: Deliverer,
    rx: mpsc::Receiver<WebhookEvent>,
    workers: Arc<Semaphore>,
}

impl WebhookDispatcher {
    pub fn new(deliverer: Deliverer, rx: mpsc::Receiver<WebhookEvent>, workers: usize) -> Self {
        Self {
            deliverer,
            rx,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Runs until every [`DispatchSender`] is dropped.
    ///
    /// Deliveries still in flight at that point keep running on their tasks.
    pub async fn run(mut self) {
        tracing::info!("Webhook dispatcher started");

        while let Some(event) = self.rx.recv().await {
            let permit = match self.workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let deliverer = self.deliverer.clone();

            tokio::spawn(async move {
                let outcome = deliverer.deliver(&event).await;
                record_webhook_delivery(outcome.label());
                log_outcome(&event, &outcome);
                drop(permit);
            });
        }

        tracing::info!("Webhook dispatcher stopped");
    }
}

fn log_outcome(event: &WebhookEvent, outcome: &DeliveryOutcome) {
    match outcome {
        DeliveryOutcome::Delivered { attempts } => {
            tracing::debug!(
                session_id = %event.session_id,
                event_type = %event.event_type,
                attempts,
                "Webhook delivered"
            );
        }
        DeliveryOutcome::Dropped => {}
        DeliveryOutcome::ClientError { attempts, status } => {
            tracing::warn!(
                session_id = %event.session_id,
                event_type = %event.event_type,
                attempts,
                status,
                "Webhook rejected by receiver"
            );
        }
        DeliveryOutcome::Exhausted { attempts, last_error } => {
            tracing::warn!(
                session_id = %event.session_id,
                event_type = %event.event_type,
                attempts,
                error = %last_error,
                "Webhook delivery failed"
            );
        }
        DeliveryOutcome::Cancelled { attempts } => {
            tracing::info!(
                session_id = %event.session_id,
                event_type = %event.event_type,
                attempts,
                "Webhook delivery cancelled by shutdown"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory, now_rfc3339, Session, SessionStatus, SessionStore, Webhook};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted results and records every request
    struct ScriptedSender {
        script: Mutex<VecDeque<AttemptResult>>,
        requests: Mutex<Vec<OutboundRequest>>,
    }

    impl ScriptedSender {
        fn new(script: Vec<AttemptResult>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WebhookSender for ScriptedSender {
        async fn send(&self, request: OutboundRequest) -> AttemptResult {
            self.requests.lock().push(request);
            self.script.lock().pop_front().unwrap_or(AttemptResult::Status(200))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().push(duration);
        }
    }

    async fn setup(events: &str, secret: Option<&str>) -> (WebhookStore, SessionStore) {
        let pool = init_memory().await.unwrap();
        let sessions = SessionStore::new(pool.clone());
        sessions
            .create(&Session {
                id: "s".to_string(),
                name: "alpha".to_string(),
                status: SessionStatus::Connected.to_string(),
                device_jid: Some("1@s.whatsapp.net".to_string()),
                connection_error: None,
                qr_code: None,
                qr_code_expires_at: None,
                proxy_config: None,
                created_at: now_rfc3339(),
                updated_at: now_rfc3339(),
                connected_at: None,
                last_seen: None,
            })
            .await
            .unwrap();

        let store = WebhookStore::new(pool);
        store
            .create(&Webhook {
                id: "w".to_string(),
                session_id: "s".to_string(),
                url: "https://example.com/hook".to_string(),
                secret: secret.map(str::to_string),
                events: events.to_string(),
                enabled: 1,
                created_at: now_rfc3339(),
                updated_at: now_rfc3339(),
            })
            .await
            .unwrap();
        (store, sessions)
    }

    fn deliverer(
        store: WebhookStore,
        sender: Arc<ScriptedSender>,
        sleeper: Arc<RecordingSleeper>,
    ) -> (Deliverer, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let deliverer = Deliverer::new(store, sender, sleeper, &WebhookConfig::default(), rx);
        (deliverer, tx)
    }

    fn event(event_type: EventType) -> WebhookEvent {
        WebhookEvent {
            id: "e".to_string(),
            event_type,
            session_id: "s".to_string(),
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            data: serde_json::json!({}),
        }
    }

    #[test]
    fn test_body_field_order() {
        let body = event(EventType::Message).to_body().unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"id":"e","type":"Message","sessionId":"s","timestamp":"2025-01-01T00:00:00Z","data":{}}"#
        );
    }

    #[tokio::test]
    async fn test_filtered_event_is_dropped() {
        let (store, _) = setup(r#"["Message"]"#, None).await;
        let sender = ScriptedSender::new(vec![]);
        let (d, _tx) = deliverer(store, sender.clone(), Arc::new(RecordingSleeper::default()));

        assert_eq!(d.deliver(&event(EventType::Receipt)).await, DeliveryOutcome::Dropped);
        assert!(sender.requests.lock().is_empty());

        assert_eq!(
            d.deliver(&event(EventType::Message)).await,
            DeliveryOutcome::Delivered { attempts: 1 }
        );
        let requests = sender.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header(HEADER_EVENT), Some("Message"));
        assert_eq!(requests[0].header(HEADER_SESSION_ID), Some("s"));
        assert!(requests[0].header(HEADER_SIGNATURE).is_none());
    }

    #[tokio::test]
    async fn test_signature_header_matches_body() {
        let (store, _) = setup("[]", Some("0123456789abcdef")).await;
        let sender = ScriptedSender::new(vec![]);
        let (d, _tx) = deliverer(store, sender.clone(), Arc::new(RecordingSleeper::default()));

        d.deliver(&event(EventType::Message)).await;
        let requests = sender.requests.lock();
        assert_eq!(
            requests[0].header(HEADER_SIGNATURE),
            Some("ae475e374632f51dd289fba1e4bb2f0c6464b0b9be6f0cfd90580dd1be6de05d")
        );
        assert_eq!(requests[0].header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_retries_server_errors_on_schedule() {
        let (store, _) = setup("[]", None).await;
        let sender = ScriptedSender::new(vec![
            AttemptResult::Status(500),
            AttemptResult::Status(500),
            AttemptResult::Status(200),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let (d, _tx) = deliverer(store, sender.clone(), sleeper.clone());

        let outcome = d.deliver(&event(EventType::Message)).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert_eq!(sender.requests.lock().len(), 3);
        assert_eq!(
            *sleeper.slept.lock(),
            vec![Duration::ZERO, Duration::from_secs(5), Duration::from_secs(15)]
        );
    }

    #[tokio::test]
    async fn test_client_error_is_terminal() {
        let (store, _) = setup("[]", None).await;
        let sender = ScriptedSender::new(vec![AttemptResult::Status(400)]);
        let (d, _tx) = deliverer(store, sender.clone(), Arc::new(RecordingSleeper::default()));

        let outcome = d.deliver(&event(EventType::Message)).await;
        assert_eq!(outcome, DeliveryOutcome::ClientError { attempts: 1, status: 400 });
        assert_eq!(sender.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_exhaust_budget() {
        let (store, _) = setup("[]", None).await;
        let sender = ScriptedSender::new(vec![
            AttemptResult::Transport("connection refused".to_string()),
            AttemptResult::Status(503),
            AttemptResult::Transport("timed out".to_string()),
        ]);
        let (d, _tx) = deliverer(store, sender.clone(), Arc::new(RecordingSleeper::default()));

        let outcome = d.deliver(&event(EventType::Message)).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Exhausted {
                attempts: 3,
                last_error: "timed out".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_deleted_session_drops_pending_retry() {
        let (store, sessions) = setup("[]", None).await;

        /// Deletes the session while the first retry delay is pending
        struct DeletingSleeper {
            sessions: SessionStore,
        }

        #[async_trait]
        impl Sleeper for DeletingSleeper {
            async fn sleep(&self, duration: Duration) {
                if !duration.is_zero() {
                    self.sessions.delete("s").await.unwrap();
                }
            }
        }

        let sender = ScriptedSender::new(vec![AttemptResult::Status(502)]);
        let (_tx, rx) = watch::channel(false);
        let d = Deliverer::new(
            store,
            sender.clone(),
            Arc::new(DeletingSleeper { sessions }),
            &WebhookConfig::default(),
            rx,
        );

        assert_eq!(d.deliver(&event(EventType::Message)).await, DeliveryOutcome::Dropped);
        assert_eq!(sender.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_between_attempts() {
        let (store, _) = setup("[]", None).await;
        let sender = ScriptedSender::new(vec![AttemptResult::Status(500)]);
        let (d, tx) = deliverer(store, sender.clone(), Arc::new(RecordingSleeper::default()));
        tx.send(true).unwrap();

        assert_eq!(
            d.deliver(&event(EventType::Message)).await,
            DeliveryOutcome::Cancelled { attempts: 0 }
        );
        assert!(sender.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dispatcher_drains_queue() {
        let (store, _) = setup("[]", None).await;
        let sender = ScriptedSender::new(vec![]);
        let (d, _shutdown) = deliverer(store, sender.clone(), Arc::new(RecordingSleeper::default()));
        let (tx, rx) = dispatch_channel(8);

        let handle = tokio::spawn(WebhookDispatcher::new(d, rx, 2).run());
        for _ in 0..3 {
            tx.send(event(EventType::Message)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        for _ in 0..50 {
            if sender.requests.lock().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sender.requests.lock().len(), 3);
    }
}
