//! Shared harness for the end-to-end tests.
//!
//! Builds the real router over an in-memory database with the `memory`
//! device driver. Webhook deliveries go over real HTTP to a local receiver;
//! retry delays are recorded instead of slept.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode},
    routing::post,
    Router,
};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::ServiceExt;

use wagate::config::Config;
use wagate::db::{init_memory, DbPool, DeviceStore, SessionStore, WebhookStore};
use wagate::session::SessionManager;
use wagate::webhook::{
    dispatch_channel, Deliverer, ReqwestSender, Sleeper, WebhookDispatcher, WebhookService,
};
use wagate::whatsapp::{MemoryClient, MemoryClientFactory};
use wagate::AppState;

pub const API_KEY: &str = "test-api-key";

/// Records every requested delay and returns immediately
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}

pub struct TestApp {
    pub router: Router,
    pub manager: Arc<SessionManager>,
    pub factory: Arc<MemoryClientFactory>,
    pub sleeper: Arc<RecordingSleeper>,
    pub pool: DbPool,
    shutdown: watch::Sender<bool>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_qr_lifetime(Duration::from_secs(60)).await
    }

    pub async fn with_qr_lifetime(qr_lifetime: Duration) -> Self {
        let pool = init_memory().await.unwrap();
        Self::over(pool, qr_lifetime).await
    }

    /// A second process over the same database, as after a restart
    pub async fn restarted(&self) -> Self {
        Self::over(self.pool.clone(), Duration::from_secs(60)).await
    }

    async fn over(pool: DbPool, qr_lifetime: Duration) -> Self {
        let mut config = Config::default();
        config.auth.api_key = API_KEY.to_string();
        config.sessions.connect_wait_secs = 2;
        config.sessions.qr_wait_secs = 2;
        config.webhooks.timeout_secs = 5;

        let sessions = SessionStore::new(pool.clone());
        let devices = DeviceStore::new(pool.clone());
        let webhook_store = WebhookStore::new(pool.clone());
        let webhooks = WebhookService::new(
            webhook_store.clone(),
            sessions.clone(),
            config.webhooks.allow_loopback,
        );

        let sleeper = Arc::new(RecordingSleeper::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (dispatch_tx, dispatch_rx) = dispatch_channel(config.webhooks.queue_capacity);
        let deliverer = Deliverer::new(
            webhook_store,
            Arc::new(ReqwestSender::new(config.webhooks.timeout()).unwrap()),
            sleeper.clone(),
            &config.webhooks,
            shutdown_rx,
        );
        tokio::spawn(WebhookDispatcher::new(deliverer, dispatch_rx, config.webhooks.workers).run());

        let factory = Arc::new(MemoryClientFactory::new(qr_lifetime));
        let manager = Arc::new(SessionManager::new(
            sessions,
            devices,
            webhooks.clone(),
            factory.clone(),
            dispatch_tx,
            config.sessions.clone(),
        ));

        let state = Arc::new(AppState::new(config, manager.clone(), webhooks));
        let router = wagate::api::create_router(state);

        Self {
            router,
            manager,
            factory,
            sleeper,
            pool,
            shutdown,
        }
    }

    /// Most recent device client opened for a session
    pub fn client(&self, id: &str) -> Arc<MemoryClient> {
        self.factory.client(id).expect("no client opened for session")
    }

    pub async fn raw(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes)
    }

    /// Authenticated JSON request; returns the status and the parsed envelope
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-API-Key", API_KEY);
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let (status, bytes) = self.raw(request).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::POST, uri, None).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::DELETE, uri, None).await
    }

    /// Create a session and return its id
    pub async fn create_session(&self, body: Value) -> String {
        let (status, json) = self.post("/sessions/create", body).await;
        assert_eq!(status, StatusCode::CREATED, "{}", json);
        json["data"]["id"].as_str().unwrap().to_string()
    }

    pub async fn info(&self, id: &str) -> Value {
        let (status, json) = self.get(&format!("/sessions/{}/info", id)).await;
        assert_eq!(status, StatusCode::OK, "{}", json);
        json["data"].clone()
    }

    /// Poll the session view until `pred` holds
    pub async fn wait_for_info<F>(&self, id: &str, pred: F) -> Value
    where
        F: Fn(&Value) -> bool,
    {
        for _ in 0..250 {
            let info = self.info(id).await;
            if pred(&info) {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session {} never reached the expected state", id);
    }

    /// Create, connect and pair a session through the memory driver
    pub async fn paired_session(&self, name: &str, phone: &str) -> String {
        let id = self.create_session(serde_json::json!({ "name": name })).await;
        let (status, json) = self.post_empty(&format!("/sessions/{}/connect", id)).await;
        assert_eq!(status, StatusCode::OK, "{}", json);
        assert_eq!(json["data"]["status"], "qr_code");

        self.client(&id).simulate_scan(phone).await.unwrap();
        self.wait_for_info(&id, |s| s["status"] == "connected").await;
        id
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
        let _ = self.shutdown.send(true);
    }
}

/// One request seen by the [`Receiver`]
#[derive(Debug, Clone)]
pub struct Received {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Clone, Default)]
struct ReceiverState {
    requests: Arc<Mutex<Vec<Received>>>,
    statuses: Arc<Mutex<VecDeque<u16>>>,
}

/// Webhook endpoint bound to a loopback port.
///
/// Answers with the scripted statuses in order, then 200.
pub struct Receiver {
    pub url: String,
    state: ReceiverState,
}

impl Receiver {
    pub async fn start(statuses: &[u16]) -> Self {
        let state = ReceiverState::default();
        state.statuses.lock().extend(statuses.iter().copied());

        let app = Router::new()
            .route("/hook", post(receive))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}/hook", addr),
            state,
        }
    }

    pub fn requests(&self) -> Vec<Received> {
        self.state.requests.lock().clone()
    }

    /// Wait until at least `count` requests arrived
    pub async fn wait_for(&self, count: usize) -> Vec<Received> {
        for _ in 0..250 {
            let requests = self.requests();
            if requests.len() >= count {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {} webhook requests, got {}",
            count,
            self.requests().len()
        );
    }

    /// Give in-flight deliveries time to land, then return everything seen
    pub async fn settle(&self) -> Vec<Received> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.requests()
    }
}

async fn receive(State(state): State<ReceiverState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    state.requests.lock().push(Received { headers, body });
    let status = state.statuses.lock().pop_front().unwrap_or(200);
    StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
}
