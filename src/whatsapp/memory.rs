//! In-process device simulator.
//!
//! Behaves like a real device connection from the manager's point of view:
//! pairing emits QR codes with lifetimes, a successful scan persists
//! credentials in the device store, and a later `connect` resumes from them.
//! The `simulate_*` methods stand in for the phone side.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use super::{ClientEvent, ClientFactory, DeviceRef, EventHandler, WhatsAppClient};
use crate::db::ProxyConfig;
use crate::error::{GatewayError, Result};

/// Alphabet used for phone linking codes
const LINK_CODE_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTVWXYZ";

pub struct MemoryClientFactory {
    qr_timeout: Duration,
    clients: DashMap<String, Arc<MemoryClient>>,
    opened: DashMap<String, usize>,
}

impl MemoryClientFactory {
    pub fn new(qr_timeout: Duration) -> Self {
        Self {
            qr_timeout,
            clients: DashMap::new(),
            opened: DashMap::new(),
        }
    }

    /// Most recent client opened for a session
    pub fn client(&self, session_id: &str) -> Option<Arc<MemoryClient>> {
        self.clients.get(session_id).map(|c| c.value().clone())
    }

    /// How many clients were ever opened for a session
    pub fn opened(&self, session_id: &str) -> usize {
        self.opened.get(session_id).map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl ClientFactory for MemoryClientFactory {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn new_client(
        &self,
        device: DeviceRef,
        proxy: Option<ProxyConfig>,
    ) -> Result<Arc<dyn WhatsAppClient>> {
        let session_id = device.session_id.clone();
        let client = Arc::new(MemoryClient::new(device, proxy, self.qr_timeout));
        *self.opened.entry(session_id.clone()).or_insert(0) += 1;
        self.clients.insert(session_id, client.clone());
        Ok(client)
    }
}

#[derive(Default)]
struct DeviceState {
    connected: bool,
    pairing: bool,
    jid: Option<String>,
    fail_connect: Option<String>,
    link_requests: Vec<String>,
}

pub struct MemoryClient {
    device: DeviceRef,
    proxy: Option<ProxyConfig>,
    qr_timeout: Duration,
    handlers: RwLock<Vec<EventHandler>>,
    state: Mutex<DeviceState>,
}

impl MemoryClient {
    fn new(device: DeviceRef, proxy: Option<ProxyConfig>, qr_timeout: Duration) -> Self {
        Self {
            device,
            proxy,
            qr_timeout,
            handlers: RwLock::new(Vec::new()),
            state: Mutex::new(DeviceState::default()),
        }
    }

    fn emit(&self, event: ClientEvent) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler(event.clone());
        }
    }

    fn emit_qr(&self) {
        self.emit(ClientEvent::Qr {
            code: new_qr_code(),
            timeout: self.qr_timeout,
        });
    }

    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    pub fn is_pairing(&self) -> bool {
        self.state.lock().pairing
    }

    /// Phone numbers passed to `pair_phone`, oldest first
    pub fn link_requests(&self) -> Vec<String> {
        self.state.lock().link_requests.clone()
    }

    /// Make the next `connect` fail with `message`
    pub fn fail_next_connect(&self, message: impl Into<String>) {
        self.state.lock().fail_connect = Some(message.into());
    }

    /// The phone scans the current code
    pub async fn simulate_scan(&self, phone: &str) -> Result<String> {
        if !self.is_pairing() {
            return Err(GatewayError::PairingFailed("no pairing in progress".to_string()));
        }

        let jid = format!("{}@s.whatsapp.net", phone.trim_start_matches('+'));
        let mut credentials = [0u8; 32];
        rand::rng().fill(&mut credentials[..]);
        self.device
            .store
            .save(&self.device.session_id, Some(&jid), &credentials)
            .await?;

        {
            let mut state = self.state.lock();
            state.pairing = false;
            state.connected = true;
            state.jid = Some(jid.clone());
        }

        self.emit(ClientEvent::PairSuccess {
            jid: jid.clone(),
            platform: Some("android".to_string()),
            business_name: None,
        });
        self.emit(ClientEvent::Connected);
        Ok(jid)
    }

    /// The device is unlinked from the phone
    pub fn simulate_unlink(&self) {
        {
            let mut state = self.state.lock();
            state.connected = false;
            state.pairing = false;
            state.jid = None;
        }
        self.emit(ClientEvent::LoggedOut {
            on_connect: false,
            reason: "device removed".to_string(),
        });
    }

    /// The connection drops without a logout
    pub fn simulate_drop(&self) {
        {
            let mut state = self.state.lock();
            state.connected = false;
            state.pairing = false;
        }
        self.emit(ClientEvent::Disconnected);
    }

    /// Raise an arbitrary library event
    pub fn inject(&self, event: ClientEvent) {
        self.emit(event);
    }
}

#[async_trait]
impl WhatsAppClient for MemoryClient {
    fn subscribe(&self, handler: EventHandler) {
        self.handlers.write().push(handler);
    }

    async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if let Some(message) = state.fail_connect.take() {
                return Err(GatewayError::UpstreamUnavailable(message));
            }
            if state.connected {
                return Ok(());
            }
        }

        match self.device.store.get(&self.device.session_id).await? {
            Some(credentials) => {
                {
                    let mut state = self.state.lock();
                    state.connected = true;
                    state.pairing = false;
                    state.jid = credentials.jid;
                }
                self.emit(ClientEvent::Connected);
            }
            None => {
                self.state.lock().pairing = true;
                self.emit_qr();
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let was_open = {
            let mut state = self.state.lock();
            let was_open = state.connected || state.pairing;
            state.connected = false;
            state.pairing = false;
            was_open
        };
        if was_open {
            self.emit(ClientEvent::Disconnected);
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.device.store.delete(&self.device.session_id).await?;
        let mut state = self.state.lock();
        state.connected = false;
        state.pairing = false;
        state.jid = None;
        Ok(())
    }

    async fn pair_phone(&self, phone: &str) -> Result<String> {
        let mut state = self.state.lock();
        if state.connected {
            return Err(GatewayError::AlreadyConnected);
        }
        if !state.pairing {
            return Err(GatewayError::PairingFailed(
                "client is not waiting for pairing".to_string(),
            ));
        }
        state.link_requests.push(phone.to_string());
        Ok(new_link_code())
    }

    async fn refresh_qr(&self) -> Result<()> {
        if !self.is_pairing() {
            return Err(GatewayError::PairingFailed("no pairing in progress".to_string()));
        }
        self.emit_qr();
        Ok(())
    }

    fn device_jid(&self) -> Option<String> {
        self.state.lock().jid.clone()
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}

fn new_qr_code() -> String {
    let mut rng = rand::rng();
    let reference: [u8; 16] = rng.random();
    let noise_key: [u8; 32] = rng.random();
    let identity_key: [u8; 32] = rng.random();
    format!(
        "2@{},{},{}",
        hex::encode(reference),
        hex::encode(noise_key),
        hex::encode(identity_key)
    )
}

fn new_link_code() -> String {
    let mut rng = rand::rng();
    (0..8)
        .map(|_| LINK_CODE_ALPHABET[rng.random_range(0..LINK_CODE_ALPHABET.len())] as char)
        .collect()
}
