use thiserror::Error;

/// Errors that can occur within the recurring scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schedule expression is malformed or outside the supported language.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No descriptor with the given name exists in the store.
    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    /// A descriptor with the given name already exists.
    #[error("Job already exists: {name}")]
    DuplicateJob { name: String },

    /// The store cannot serve requests (e.g. its connection lock was poisoned).
    #[error("Scheduler unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
