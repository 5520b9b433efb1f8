use thiserror::Error;

use courier_core::OwnerId;
use courier_scheduler::SchedulerError;
use courier_users::UserError;

/// Failures of a single composition event. None of them is fatal: the
/// session either stays where it was or was already reset to idle.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// Malformed or unsupported input. The draft is unchanged; re-prompt.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// The owner may not schedule. No draft exists afterwards.
    #[error("Permission denied for {owner}")]
    PermissionDenied { owner: OwnerId },

    /// A storage commit failed; nothing from this event was persisted.
    #[error("Storage failure: {0}")]
    Persistence(String),

    /// Referenced target or composition does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ComposeError {
    pub fn code(&self) -> &'static str {
        match self {
            ComposeError::Validation(_) => "VALIDATION_ERROR",
            ComposeError::PermissionDenied { .. } => "PERMISSION_DENIED",
            ComposeError::Persistence(_) => "PERSISTENCE_ERROR",
            ComposeError::NotFound(_) => "NOT_FOUND",
        }
    }
}

impl From<SchedulerError> for ComposeError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::InvariantViolation(msg) => ComposeError::Validation(msg),
            other => ComposeError::Persistence(other.to_string()),
        }
    }
}

impl From<UserError> for ComposeError {
    fn from(e: UserError) -> Self {
        match e {
            UserError::GroupNotFound(id) => ComposeError::NotFound(format!("group {id}")),
            other => ComposeError::Persistence(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ComposeError>;
