//! HTTP client for the downstream worker.
//!
//! - text: `POST {worker_url}/execute` with `{prompt}`
//! - voice: `POST {stt_url}/stt` with `{data, agent_server_url, callback_url}`

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::ports::{UpstreamError, WorkerClient};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// reqwest based `WorkerClient`.
#[derive(Clone)]
pub struct HttpWorkerClient {
    worker_url: String,
    stt_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct TextJobBody<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
struct VoiceJobBody<'a> {
    data: &'a str,
    agent_server_url: &'a str,
    callback_url: &'a str,
}

impl HttpWorkerClient {
    #[must_use]
    pub fn new(worker_url: impl Into<String>, stt_url: impl Into<String>) -> Self {
        Self::with_timeout(worker_url, stt_url, DEFAULT_REQUEST_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(
        worker_url: impl Into<String>,
        stt_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to configure reqwest client; using defaults");
                reqwest::Client::new()
            });
        Self {
            worker_url: worker_url.into(),
            stt_url: stt_url.into(),
            client,
        }
    }

    fn execute_url(&self) -> String {
        format!("{}/execute", self.worker_url.trim_end_matches('/'))
    }

    fn stt_url(&self) -> String {
        format!("{}/stt", self.stt_url.trim_end_matches('/'))
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: String,
        body: &B,
        what: &str,
    ) -> Result<serde_json::Value, UpstreamError> {
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamError::transport(format!("{what} request failed: {e}")))?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            UpstreamError::transport(format!("failed reading {what} response body: {e}"))
        })?;

        if status.is_success() {
            return serde_json::from_slice(&bytes).map_err(|e| {
                UpstreamError::status(status.as_u16(), format!("invalid {what} response: {e}"))
            });
        }

        let message = serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|value| {
                value
                    .get("error")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("{what} error! status: {}", status.as_u16()));

        tracing::error!(
            url = %url,
            status = status.as_u16(),
            body = %String::from_utf8_lossy(&bytes),
            "{what} call failed"
        );
        Err(UpstreamError::status(status.as_u16(), message))
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn execute_text(&self, prompt: &str) -> Result<serde_json::Value, UpstreamError> {
        self.post_json(self.execute_url(), &TextJobBody { prompt }, "worker")
            .await
    }

    async fn submit_voice(
        &self,
        audio: &str,
        callback_url: &str,
    ) -> Result<serde_json::Value, UpstreamError> {
        let body = VoiceJobBody {
            data: audio,
            agent_server_url: &self.worker_url,
            callback_url,
        };
        self.post_json(self.stt_url(), &body, "STT server").await
    }
}
