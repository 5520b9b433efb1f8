use thiserror::Error;

/// All user-layer errors. Kept separate from the composition errors so the
/// Telegram adapter can phrase them without coupling layers.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("Operator not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Connection lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, UserError>;
