//! WorkerClient port - downstream worker との境界
//!
//! - text job: worker が同期的に結果を返す（body はそのまま caller へ）
//! - voice job: worker は受付だけ返し、結果は後から callback_url に POST される

use async_trait::async_trait;
use thiserror::Error;

/// A failed call to the worker.
///
/// `status` is `None` when no HTTP response was received at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Run a text job and return the worker's JSON body unchanged.
    async fn execute_text(&self, prompt: &str) -> Result<serde_json::Value, UpstreamError>;

    /// Hand a voice job to the worker; the result arrives later at `callback_url`.
    ///
    /// Returns the worker's acknowledgment body.
    async fn submit_voice(
        &self,
        audio: &str,
        callback_url: &str,
    ) -> Result<serde_json::Value, UpstreamError>;
}
