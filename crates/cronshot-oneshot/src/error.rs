use cronshot_scheduler::SchedulerError;
use thiserror::Error;

/// Errors surfaced by one-shot job management.
///
/// Submission errors reach the caller. Errors raised while a job parks itself
/// or while the reaper runs are logged and swallowed by those paths.
#[derive(Debug, Error)]
pub enum OneShotError {
    /// Store or transport failure. Not retried; retry policy is the caller's.
    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    /// An active descriptor (or a pending body) already uses this identifier.
    #[error("Duplicate job identifier: {id}")]
    DuplicateIdentifier { id: String },

    /// No descriptor exists for this identifier (e.g. it was already reaped).
    #[error("Job identifier not found: {id}")]
    IdentifierNotFound { id: String },

    /// The configured immediate interval is not accepted by the scheduler.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

impl From<SchedulerError> for OneShotError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::DuplicateJob { name } => OneShotError::DuplicateIdentifier { id: name },
            SchedulerError::JobNotFound { name } => OneShotError::IdentifierNotFound { id: name },
            SchedulerError::InvalidSchedule(reason) => OneShotError::InvalidSchedule(reason),
            other @ (SchedulerError::Database(_) | SchedulerError::Unavailable(_)) => {
                OneShotError::SchedulerUnavailable(other.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, OneShotError>;
