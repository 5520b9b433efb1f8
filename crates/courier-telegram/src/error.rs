/// Errors raised while bringing the Telegram front-end up.
///
/// Failures after startup (sends, deletes, replies) are logged or mapped to
/// `DeliveryError` instead.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    /// The Bot API refused the token or could not be reached.
    #[error("telegram startup check failed: {0}")]
    Startup(#[from] teloxide::RequestError),

    #[error("no bot token configured")]
    NoToken,
}
