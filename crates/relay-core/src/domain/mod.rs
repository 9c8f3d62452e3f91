//! Domain model (ids, jobs, callback payloads, errors).

pub mod errors;
pub mod ids;
pub mod job;
pub mod payload;

pub use self::errors::{RelayError, WaitError};
pub use self::ids::{CORRELATION_PREFIX, CorrelationId};
pub use self::job::{Job, JobKind, JobRequest};
pub use self::payload::{Action, ActionsResponse, CallbackOutcome, CallbackPayload};
