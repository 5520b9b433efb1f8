use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error. The failed statement left no trace.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The job would break a lifecycle invariant (e.g. delete before send).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The dispatcher is sending this job right now; it can no longer be cancelled.
    #[error("Job is being sent: {id}")]
    JobInFlight { id: String },

    #[error("Connection lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
