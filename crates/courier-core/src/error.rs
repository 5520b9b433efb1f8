use thiserror::Error;

#[derive(Debug, Error)]
pub enum CourierError {
    /// The merged TOML and environment configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CourierError {
    /// Short error code string used in log fields.
    pub fn code(&self) -> &'static str {
        match self {
            CourierError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;
