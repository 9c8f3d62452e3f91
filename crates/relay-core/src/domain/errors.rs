//! Errors - エラー型と分類
//!
//! - `WaitError`: waiter の終端（reject）理由。待っている caller にだけ届く
//! - `RelayError`: submission / callback 経路の失敗。HTTP ステータスに対応付けられる

use std::time::Duration;

use thiserror::Error;

use crate::ports::UpstreamError;

/// Why a waiter was rejected instead of resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("Request timeout after {}ms", .after.as_millis())]
    TimedOut { after: Duration },

    #[error("{reason}")]
    Superseded { reason: String },

    /// Error message forwarded by the worker through the callback.
    #[error("{0}")]
    Failed(String),

    /// Dropped without a terminal transition (dispatch cleanup, registry teardown).
    #[error("pending request was abandoned")]
    Abandoned,
}

/// Failure taxonomy of the broker.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed or missing input (job body or callback body).
    #[error("{0}")]
    Validation(String),

    /// The worker, or the HTTP call to it, failed.
    #[error("{message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Request timeout after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    #[error("{0}")]
    Superseded(String),

    /// The job ran but the worker reported an error.
    #[error("{0}")]
    JobFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl From<WaitError> for RelayError {
    fn from(value: WaitError) -> Self {
        match value {
            WaitError::TimedOut { after } => Self::Timeout { after },
            WaitError::Superseded { reason } => Self::Superseded(reason),
            WaitError::Failed(message) => Self::JobFailed(message),
            WaitError::Abandoned => Self::Internal(value.to_string()),
        }
    }
}

impl From<UpstreamError> for RelayError {
    fn from(value: UpstreamError) -> Self {
        Self::Upstream {
            status: value.status,
            message: value.message,
        }
    }
}
