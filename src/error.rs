//! Error type shared by the session and webhook core.
//!
//! Every fallible core operation returns [`GatewayError`]. The HTTP layer is
//! the only place these kinds are translated into status codes.

use thiserror::Error;

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid {field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("session is already connected")]
    AlreadyConnected,

    #[error("session is not connected")]
    NotConnected,

    #[error("no QR code available for this session")]
    QrNotAvailable,

    #[error("pairing failed: {0}")]
    PairingFailed(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl GatewayError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::NotFound(format!("session {}", id))
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => GatewayError::NotFound("record".to_string()),
            sqlx::Error::Database(db_err)
                if db_err.message().contains("UNIQUE constraint failed")
                    || db_err.message().contains("PRIMARY KEY") =>
            {
                GatewayError::AlreadyExists("record".to_string())
            }
            _ => GatewayError::Store(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Store(format!("corrupt JSON column: {}", err))
    }
}
