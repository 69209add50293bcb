//! WhatsApp session models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::{parse_proxy, ProxyConfig};
use super::webhook::UpsertWebhookRequest;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    QrCode,
    Connected,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::QrCode => write!(f, "qr_code"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl From<String> for SessionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "disconnected" => Self::Disconnected,
            "connecting" => Self::Connecting,
            "qr_code" => Self::QrCode,
            "connected" => Self::Connected,
            "error" => Self::Error,
            _ => Self::Error,
        }
    }
}

/// Session row stored in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub status: String,
    pub device_jid: Option<String>,
    pub connection_error: Option<String>,
    pub qr_code: Option<String>,
    pub qr_code_expires_at: Option<String>,
    /// JSON serialized ProxyConfig
    pub proxy_config: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub connected_at: Option<String>,
    pub last_seen: Option<String>,
}

impl Session {
    pub fn status_enum(&self) -> SessionStatus {
        SessionStatus::from(self.status.clone())
    }

    pub fn proxy(&self) -> Option<ProxyConfig> {
        parse_proxy(self.proxy_config.as_deref())
    }

    pub fn is_connected(&self) -> bool {
        self.status_enum() == SessionStatus::Connected
    }
}

/// Response DTO for Session.
///
/// The QR fields are only populated while the session is waiting for a scan,
/// and never in list views.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub name: String,
    pub status: SessionStatus,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_jid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code_expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

impl SessionResponse {
    /// List-view projection: never carries pairing artifacts
    pub fn summary(session: Session) -> Self {
        let mut response = Self::from(session);
        response.qr_code = None;
        response.qr_code_expires_at = None;
        response
    }
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        let status = session.status_enum();
        let proxy = session.proxy().map(|p| p.masked());
        let (qr_code, qr_code_expires_at) = if status == SessionStatus::QrCode {
            (session.qr_code, session.qr_code_expires_at)
        } else {
            (None, None)
        };

        Self {
            id: session.id,
            name: session.name,
            status,
            connected: status == SessionStatus::Connected,
            device_jid: session.device_jid,
            connection_error: session.connection_error,
            qr_code,
            qr_code_expires_at,
            proxy,
            created_at: session.created_at,
            updated_at: session.updated_at,
            connected_at: session.connected_at,
            last_seen: session.last_seen,
        }
    }
}

/// Request to create a session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub name: String,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub webhook: Option<UpsertWebhookRequest>,
    #[serde(default, alias = "generateQR")]
    pub generate_qr: bool,
}

/// Pagination for session listing
#[derive(Debug, Clone, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl Default for ListSessionsQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Current pairing code for a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeResponse {
    pub qr_code: String,
    pub expires_at: String,
    pub expired: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairPhoneRequest {
    pub phone: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairPhoneResponse {
    pub linking_code: String,
}
