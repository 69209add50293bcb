//! Unified API error handling for the gateway.
//!
//! Every error leaves the HTTP boundary in the shared envelope
//! `{success: false, error: {code, message, field?}, timestamp}`.
//! [`GatewayError`] kinds are mapped to status codes here and nowhere else.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::now_rfc3339;
use crate::error::GatewayError;

/// Stable `error.code` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Client errors (4xx)
    BadRequest,
    Unauthorized,
    NotFound,
    Conflict,
    AlreadyConnected,
    NotConnected,
    QrNotAvailable,
    PreconditionFailed,
    ValidationError,

    // Server errors (5xx)
    DatabaseError,
    UpstreamUnavailable,
    PairingFailed,
    GatewayTimeout,
}

impl ErrorCode {
    /// Status sent with this code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict
            | ErrorCode::AlreadyConnected
            | ErrorCode::NotConnected
            | ErrorCode::QrNotAvailable => StatusCode::CONFLICT,
            ErrorCode::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::DatabaseError
            | ErrorCode::UpstreamUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::PairingFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::AlreadyConnected => "already_connected",
            ErrorCode::NotConnected => "not_connected",
            ErrorCode::QrNotAvailable => "qr_not_available",
            ErrorCode::PreconditionFailed => "precondition_failed",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::DatabaseError => "database_error",
            ErrorCode::UpstreamUnavailable => "upstream_unavailable",
            ErrorCode::PairingFailed => "pairing_failed",
            ErrorCode::GatewayTimeout => "timeout",
        }
    }
}

/// `error` member of a failed response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    /// Offending request field, for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
    pub timestamp: String,
}

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    status: StatusCode,
    message: String,
    field: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code(),
            code,
            message: message.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Missing or wrong API key
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message).with_field(field)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let response = ErrorResponse {
            success: false,
            error: ErrorBody {
                code: self.code.as_str().to_string(),
                message: self.message,
                field: self.field,
            },
            timestamp: now_rfc3339(),
        };

        (self.status, Json(response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

// -------------------------------------------------------------------------
// Conversion implementations
// -------------------------------------------------------------------------

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let message = err.to_string();
        match err {
            GatewayError::NotFound(_) => ApiError::not_found(message),
            GatewayError::AlreadyExists(_) => ApiError::conflict(message),
            GatewayError::InvalidInput { field, message } => {
                ApiError::validation_field(&field, message)
            }
            GatewayError::InvalidState(_) => ApiError::new(ErrorCode::PreconditionFailed, message),
            GatewayError::AlreadyConnected => ApiError::new(ErrorCode::AlreadyConnected, message),
            GatewayError::NotConnected => ApiError::new(ErrorCode::NotConnected, message),
            GatewayError::QrNotAvailable => ApiError::new(ErrorCode::QrNotAvailable, message),
            GatewayError::PairingFailed(_) => ApiError::new(ErrorCode::PairingFailed, message),
            GatewayError::Timeout(_) => ApiError::new(ErrorCode::GatewayTimeout, message),
            GatewayError::UpstreamUnavailable(_) => {
                tracing::error!(error = %message, "Upstream error");
                ApiError::new(ErrorCode::UpstreamUnavailable, message)
            }
            GatewayError::Store(_) => {
                tracing::error!(error = %message, "Store error");
                ApiError::database("A database error occurred")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(format!("Invalid query: {}", rejection.body_text()))
    }
}
