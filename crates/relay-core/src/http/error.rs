//! HTTP mapping of `RelayError`.
//!
//! Two body shapes exist:
//! - submission: `{ "error": "..." }`
//! - callback:   `{ "success": false, "message": "...", "error": "..." }`

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::domain::RelayError;

/// Which endpoint family produced the error; decides the body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Submit,
    Callback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Acknowledgment returned to the worker by the callback endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackAck {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            error: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    surface: Surface,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, surface: Surface) -> Self {
        Self {
            status,
            message: message.into(),
            surface,
        }
    }

    pub fn from_relay(err: RelayError, surface: Surface) -> Self {
        Self::new(status_code(&err), err.to_string(), surface)
    }

    pub fn method_not_allowed(surface: Surface) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", surface)
    }

    pub fn bad_request(message: impl Into<String>, surface: Surface) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, surface)
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// HTTP status for each failure class.
///
/// - Validation: 400
/// - Upstream: the worker's own error status, 502 when there was none
/// - Forbidden: 403, NotFound: 404
/// - Timeout: 504, Superseded: 409
/// - JobFailed / Internal: 500
pub fn status_code(err: &RelayError) -> StatusCode {
    match err {
        RelayError::Validation(_) => StatusCode::BAD_REQUEST,
        RelayError::Upstream { status, .. } => status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY),
        RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
        RelayError::NotFound(_) => StatusCode::NOT_FOUND,
        RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Superseded(_) => StatusCode::CONFLICT,
        RelayError::JobFailed(_) | RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.surface {
            Surface::Submit => (
                self.status,
                Json(ErrorBody {
                    error: self.message,
                }),
            )
                .into_response(),
            Surface::Callback => (
                self.status,
                Json(CallbackAck {
                    success: false,
                    message: Some(self.message.clone()),
                    error: Some(self.message),
                }),
            )
                .into_response(),
        }
    }
}
