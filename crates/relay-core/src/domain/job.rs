//! Job submission model.
//!
//! `JobRequest` is the wire shape; `Job` is what survives validation.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::errors::RelayError;

/// Discriminator sent by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Text,
    Voice,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
        }
    }
}

/// Raw job submission body.
///
/// `type` is kept as a free string so an unknown discriminator becomes a
/// validation error instead of a JSON decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Base64 encoded audio (no `data:` URL prefix).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl JobRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            kind: Some(JobKind::Text.as_str().to_string()),
            prompt: Some(prompt.into()),
            audio: None,
        }
    }

    pub fn voice(audio: impl Into<String>) -> Self {
        Self {
            kind: Some(JobKind::Voice.as_str().to_string()),
            prompt: None,
            audio: Some(audio.into()),
        }
    }

    /// Resolve the job kind.
    ///
    /// An omitted `type` means `voice` when audio is attached, `text` otherwise.
    pub fn resolve_kind(&self) -> Result<JobKind, RelayError> {
        match self.kind.as_deref().map(str::trim) {
            None | Some("") => Ok(if self.audio.is_some() {
                JobKind::Voice
            } else {
                JobKind::Text
            }),
            Some("text") => Ok(JobKind::Text),
            Some("voice") => Ok(JobKind::Voice),
            Some(_) => Err(RelayError::validation(
                "Invalid request type. Must be \"text\" or \"voice\"",
            )),
        }
    }

    /// Validate and convert into a `Job`.
    pub fn into_job(self) -> Result<Job, RelayError> {
        match self.resolve_kind()? {
            JobKind::Text => {
                let prompt = self
                    .prompt
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| RelayError::validation("Prompt is required for text requests"))?;
                Ok(Job::Text { prompt })
            }
            JobKind::Voice => {
                let audio = self
                    .audio
                    .filter(|a| !a.trim().is_empty())
                    .ok_or_else(|| {
                        RelayError::validation("Audio data is required for voice requests")
                    })?;
                STANDARD.decode(audio.trim()).map_err(|e| {
                    RelayError::validation(format!("Audio data must be base64 encoded: {e}"))
                })?;
                Ok(Job::Voice { audio })
            }
        }
    }
}

/// A validated job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Text { prompt: String },
    Voice { audio: String },
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::Text { .. } => JobKind::Text,
            Self::Voice { .. } => JobKind::Voice,
        }
    }
}
