//! Error type for queue operations.

use db::StoreError;
use queue_core::{JobId, JobStatus};

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced to callers of the producer, registry and scheduler.
///
/// Job-level failures are never reported here: they are recorded on the job
/// itself and exposed through lookups and events.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {id} is {status} and cannot be {action}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Invalid schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] crate::persistence::PersistenceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueueError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        QueueError::Validation(message.into())
    }
}
