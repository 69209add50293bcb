//! Device credential model owned by the WhatsApp library.

use sqlx::FromRow;

/// Opaque credential blob persisted for a paired device
#[derive(Debug, Clone, FromRow)]
pub struct DeviceCredentials {
    pub session_id: String,
    pub jid: Option<String>,
    pub credentials: Vec<u8>,
    pub updated_at: String,
}
