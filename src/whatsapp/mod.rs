//! The device library as seen by the session manager.
//!
//! A [`ClientFactory`] opens one [`WhatsAppClient`] per session. Clients push
//! [`ClientEvent`]s to subscribed handlers from whatever task the library
//! runs on; handlers must not block.

mod memory;

pub use memory::{MemoryClient, MemoryClientFactory};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DriverType, SessionsConfig};
use crate::db::{DeviceStore, ProxyConfig};
use crate::error::{GatewayError, Result};

/// Library-side events, before translation into the webhook catalog
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A pairing code to render as QR; valid for `timeout`
    Qr { code: String, timeout: Duration },
    /// The phone accepted the pairing
    PairSuccess {
        jid: String,
        platform: Option<String>,
        business_name: Option<String>,
    },
    /// Pairing was accepted by the phone but failed to complete
    PairError { message: String },
    Connected,
    Disconnected,
    /// The device was unlinked; credentials are no longer valid
    LoggedOut { on_connect: bool, reason: String },
    /// Connection-level failure reported by the library
    StreamError { message: String },
    KeepAliveTimeout { error_count: u32 },
    KeepAliveRestored,
    /// Any other typed library event with its structured payload
    Notification {
        kind: NotificationKind,
        payload: serde_json::Value,
    },
    /// An event type this gateway does not know about
    Other {
        kind: String,
        payload: serde_json::Value,
    },
}

impl ClientEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::Qr { .. } => "qr",
            Self::PairSuccess { .. } => "pair_success",
            Self::PairError { .. } => "pair_error",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::LoggedOut { .. } => "logged_out",
            Self::StreamError { .. } => "stream_error",
            Self::KeepAliveTimeout { .. } => "keepalive_timeout",
            Self::KeepAliveRestored => "keepalive_restored",
            Self::Notification { kind, .. } => kind.as_str(),
            Self::Other { kind, .. } => kind,
        }
    }
}

/// Typed library notifications carrying an opaque payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Message,
    UndecryptableMessage,
    Receipt,
    Presence,
    ChatPresence,
    GroupInfo,
    JoinedGroup,
    Picture,
    IdentityChange,
    PrivacySettings,
    Blocklist,
    HistorySync,
    OfflineSyncPreview,
    OfflineSyncCompleted,
    AppState,
    AppStateSyncComplete,
    CallOffer,
    CallAccept,
    CallPreAccept,
    CallTransport,
    CallOfferNotice,
    CallRelayLatency,
    CallTerminate,
    UnknownCallEvent,
    NewsletterJoin,
    NewsletterLeave,
    NewsletterMuteChange,
    NewsletterLiveUpdate,
    NewsletterMessageMeta,
    MediaRetry,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::UndecryptableMessage => "undecryptable_message",
            Self::Receipt => "receipt",
            Self::Presence => "presence",
            Self::ChatPresence => "chat_presence",
            Self::GroupInfo => "group_info",
            Self::JoinedGroup => "joined_group",
            Self::Picture => "picture",
            Self::IdentityChange => "identity_change",
            Self::PrivacySettings => "privacy_settings",
            Self::Blocklist => "blocklist",
            Self::HistorySync => "history_sync",
            Self::OfflineSyncPreview => "offline_sync_preview",
            Self::OfflineSyncCompleted => "offline_sync_completed",
            Self::AppState => "app_state",
            Self::AppStateSyncComplete => "app_state_sync_complete",
            Self::CallOffer => "call_offer",
            Self::CallAccept => "call_accept",
            Self::CallPreAccept => "call_pre_accept",
            Self::CallTransport => "call_transport",
            Self::CallOfferNotice => "call_offer_notice",
            Self::CallRelayLatency => "call_relay_latency",
            Self::CallTerminate => "call_terminate",
            Self::UnknownCallEvent => "unknown_call_event",
            Self::NewsletterJoin => "newsletter_join",
            Self::NewsletterLeave => "newsletter_leave",
            Self::NewsletterMuteChange => "newsletter_mute_change",
            Self::NewsletterLiveUpdate => "newsletter_live_update",
            Self::NewsletterMessageMeta => "newsletter_message_meta",
            Self::MediaRetry => "media_retry",
        }
    }
}

/// Callback invoked once per library event
pub type EventHandler = Arc<dyn Fn(ClientEvent) + Send + Sync>;

/// One device connection
#[async_trait]
pub trait WhatsAppClient: Send + Sync {
    /// Register a handler for every event this client raises
    fn subscribe(&self, handler: EventHandler);

    /// Open the connection. Resumes when the device store holds
    /// credentials, otherwise starts QR pairing.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Unlink the device and purge its stored credentials
    async fn logout(&self) -> Result<()>;

    /// Request an 8-character linking code for phone-number pairing
    async fn pair_phone(&self, phone: &str) -> Result<String>;

    /// Ask for a fresh pairing code; it arrives as a new `Qr` event
    async fn refresh_qr(&self) -> Result<()>;

    fn device_jid(&self) -> Option<String>;

    fn is_connected(&self) -> bool;
}

/// Where a client keeps its credentials
#[derive(Clone)]
pub struct DeviceRef {
    pub session_id: String,
    pub store: DeviceStore,
}

#[async_trait]
pub trait ClientFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build a client without performing any network I/O
    async fn new_client(
        &self,
        device: DeviceRef,
        proxy: Option<ProxyConfig>,
    ) -> Result<Arc<dyn WhatsAppClient>>;
}

/// Factory used when no device library is available
pub struct NoopClientFactory;

#[async_trait]
impl ClientFactory for NoopClientFactory {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn new_client(
        &self,
        _device: DeviceRef,
        _proxy: Option<ProxyConfig>,
    ) -> Result<Arc<dyn WhatsAppClient>> {
        Ok(Arc::new(NoopClient))
    }
}

pub struct NoopClient;

fn unavailable() -> GatewayError {
    GatewayError::UpstreamUnavailable("no WhatsApp driver configured".to_string())
}

#[async_trait]
impl WhatsAppClient for NoopClient {
    fn subscribe(&self, _handler: EventHandler) {}

    async fn connect(&self) -> Result<()> {
        Err(unavailable())
    }
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
    async fn logout(&self) -> Result<()> {
        Err(unavailable())
    }
    async fn pair_phone(&self, _phone: &str) -> Result<String> {
        Err(unavailable())
    }
    async fn refresh_qr(&self) -> Result<()> {
        Err(unavailable())
    }
    fn device_jid(&self) -> Option<String> {
        None
    }
    fn is_connected(&self) -> bool {
        false
    }
}

/// Create the client factory for the configured driver
pub fn create_factory(config: &SessionsConfig) -> Arc<dyn ClientFactory> {
    match config.driver {
        DriverType::Memory => {
            tracing::info!("Using in-process WhatsApp driver");
            Arc::new(MemoryClientFactory::new(config.qr_lifetime()))
        }
        DriverType::None => {
            tracing::warn!("No WhatsApp driver configured. Sessions cannot connect.");
            Arc::new(NoopClientFactory)
        }
    }
}
