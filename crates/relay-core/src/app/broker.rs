//! Broker - submission path と callback path の接着剤
//!
//! 2 つの経路は直接やりとりしない。共有するのは `PendingRegistry` だけ。
//!
//! # submission (voice)
//! 1. validate
//! 2. registry に登録（dispatch より先。callback が登録を追い越さないように）
//! 3. callback URL を付けて worker に dispatch（失敗したら waiter を abandon）
//! 4. `Pending::wait()` で suspend
//!
//! # callback
//! 1. origin 検証
//! 2. payload から outcome を取り出す（actions_list と error の両方 / どちらもなし は 400）
//! 3. request_id（query 優先、次に body）で complete。id がなければ最古の waiter

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;

use super::status::RegistryStatus;
use crate::domain::{
    ActionsResponse, CallbackPayload, CorrelationId, Job, JobRequest, RelayError,
};
use crate::origin::{OriginValidator, RequestMeta};
use crate::ports::WorkerClient;
use crate::registry::{PendingRegistry, RegistryError};

/// Body returned to the submitting caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobResponse {
    /// Text jobs: whatever the worker answered, untouched.
    Passthrough(serde_json::Value),
    /// Voice jobs: the actions delivered by the callback.
    Actions(ActionsResponse),
}

/// How a callback found its waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    RequestId,
    /// No id on the callback; the oldest waiter was taken.
    Oldest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackReceipt {
    pub request_id: CorrelationId,
    pub matched_by: MatchedBy,
}

pub struct Broker {
    pub(super) registry: PendingRegistry,
    pub(super) worker: Arc<dyn WorkerClient>,
    pub(super) validator: OriginValidator,
    pub(super) callback_url: Url,
    pub(super) callback_timeout: Duration,
}

impl Broker {
    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    pub fn validator(&self) -> &OriginValidator {
        &self.validator
    }

    pub fn callback_timeout(&self) -> Duration {
        self.callback_timeout
    }

    /// Path component of the callback URL; the router mounts the callback here.
    pub fn callback_path(&self) -> &str {
        self.callback_url.path()
    }

    /// `<public-url><callback-path>?request_id=<id>`
    pub fn callback_url_for(&self, id: &CorrelationId) -> String {
        let mut url = self.callback_url.clone();
        url.query_pairs_mut().append_pair("request_id", id.as_str());
        url.into()
    }

    /// Submit with the configured callback timeout.
    pub async fn submit(&self, request: JobRequest) -> Result<JobResponse, RelayError> {
        self.submit_with_timeout(request, self.callback_timeout)
            .await
    }

    pub async fn submit_with_timeout(
        &self,
        request: JobRequest,
        timeout: Duration,
    ) -> Result<JobResponse, RelayError> {
        let job = request.into_job()?;
        tracing::info!(job_type = job.kind().as_str(), "job submitted");

        match job {
            Job::Text { prompt } => {
                let body = self.worker.execute_text(&prompt).await?;
                Ok(JobResponse::Passthrough(body))
            }
            Job::Voice { audio } => self.run_voice(&audio, timeout).await,
        }
    }

    async fn run_voice(&self, audio: &str, timeout: Duration) -> Result<JobResponse, RelayError> {
        let (id, pending) = self.registry.register(None, timeout);
        let callback_url = self.callback_url_for(&id);
        tracing::info!(request_id = %id, callback_url = %callback_url, "dispatching voice job");

        match self.worker.submit_voice(audio, &callback_url).await {
            Ok(ack) => tracing::debug!(request_id = %id, ack = %ack, "worker accepted voice job"),
            Err(e) => {
                self.registry.abandon(&id);
                tracing::error!(request_id = %id, error = %e, "voice job dispatch failed");
                return Err(e.into());
            }
        }

        tracing::info!(request_id = %id, "waiting for worker callback");
        let actions = pending.wait().await.map_err(|e| {
            tracing::warn!(request_id = %id, error = %e, "voice job did not complete");
            RelayError::from(e)
        })?;
        tracing::info!(request_id = %id, actions = actions.len(), "voice job completed");
        Ok(JobResponse::Actions(ActionsResponse {
            actions_list: actions,
        }))
    }

    /// Origin check alone, for callers that must reject before reading the body.
    pub fn authorize_callback(&self, meta: &RequestMeta) -> Result<(), RelayError> {
        if self.validator.is_trusted(meta) {
            return Ok(());
        }
        tracing::error!("callback rejected: not from the trusted worker");
        Err(RelayError::Forbidden(
            "Forbidden: Only the trusted worker can call this endpoint".to_string(),
        ))
    }

    /// Correlate an inbound callback with its waiter.
    ///
    /// `Ok` only means the callback was accepted and handed over; it says
    /// nothing about whether the original caller has picked it up yet.
    pub fn receive_callback(
        &self,
        meta: &RequestMeta,
        query_id: Option<&str>,
        payload: &CallbackPayload,
    ) -> Result<CallbackReceipt, RelayError> {
        self.authorize_callback(meta)?;
        self.deliver_callback(query_id, payload)
    }

    /// Correlation step of `receive_callback` for callers that already ran
    /// `authorize_callback`.
    pub fn deliver_callback(
        &self,
        query_id: Option<&str>,
        payload: &CallbackPayload,
    ) -> Result<CallbackReceipt, RelayError> {
        let outcome = payload.outcome()?;
        let id = CorrelationId::parse_opt(query_id)
            .or_else(|| CorrelationId::parse_opt(payload.request_id.as_deref()));

        match id {
            Some(id) => {
                self.registry.complete(&id, outcome).map_err(|e| {
                    tracing::warn!(request_id = %id, "no pending request for callback");
                    RelayError::not_found(e.to_string())
                })?;
                Ok(CallbackReceipt {
                    request_id: id,
                    matched_by: MatchedBy::RequestId,
                })
            }
            None => {
                tracing::warn!("callback without request_id; resolving the oldest pending request");
                let id = self.registry.complete_oldest(outcome).map_err(|e| {
                    tracing::warn!("no pending request for id-less callback");
                    match e {
                        RegistryError::NoPending => RelayError::not_found("No pending request"),
                        other => RelayError::not_found(other.to_string()),
                    }
                })?;
                Ok(CallbackReceipt {
                    request_id: id,
                    matched_by: MatchedBy::Oldest,
                })
            }
        }
    }

    pub fn status(&self) -> RegistryStatus {
        RegistryStatus::capture(&self.registry)
    }
}
