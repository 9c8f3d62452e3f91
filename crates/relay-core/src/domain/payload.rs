//! Callback payloads and the outcome delivered to a waiting caller.

use serde::{Deserialize, Serialize};

use super::errors::{RelayError, WaitError};

/// An opaque action descriptor produced by the worker, e.g. `{"open": ["app"]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(pub serde_json::Value);

impl From<serde_json::Value> for Action {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Body the worker posts to the callback endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_list: Option<Vec<Action>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackPayload {
    pub fn success(actions: Vec<Action>) -> Self {
        Self {
            request_id: None,
            actions_list: Some(actions),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            request_id: None,
            actions_list: None,
            error: Some(message.into()),
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Split off the outcome.
    ///
    /// Exactly one of `actions_list` / `error` must be present.
    pub fn outcome(&self) -> Result<CallbackOutcome, RelayError> {
        match (&self.actions_list, &self.error) {
            (Some(actions), None) => Ok(CallbackOutcome::Success(actions.clone())),
            (None, Some(error)) => Ok(CallbackOutcome::Failure(error.clone())),
            (Some(_), Some(_)) => Err(RelayError::validation(
                "Malformed callback: actions_list and error are mutually exclusive",
            )),
            (None, None) => Err(RelayError::validation(
                "Malformed callback: one of actions_list or error is required",
            )),
        }
    }
}

/// Terminal result handed to a waiter by the callback path.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Success(Vec<Action>),
    Failure(String),
}

impl CallbackOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Result<Vec<Action>, WaitError> {
        match self {
            Self::Success(actions) => Ok(actions),
            Self::Failure(message) => Err(WaitError::Failed(message)),
        }
    }
}

/// Successful answer returned to the original caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionsResponse {
    pub actions_list: Vec<Action>,
}
