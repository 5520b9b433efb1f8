//! Delivery gateway interface, implemented by the chat-platform adapter and
//! driven by the dispatcher.

use async_trait::async_trait;

use crate::types::{DeliveryReference, MessageKind, TargetId};

/// A failed gateway call. Always recoverable from the dispatcher's point of
/// view: the job stays in the store and is retried on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("platform rejected the request: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("delivery reference is not valid for this platform: {0}")]
    BadReference(String),

    #[error("gateway call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Sends and deletes content on the remote platform.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Deliver `content` of `kind` to `target`, returning the reference needed
    /// to delete it later.
    async fn send(
        &self,
        target: TargetId,
        content: &str,
        kind: MessageKind,
    ) -> Result<DeliveryReference, DeliveryError>;

    /// Remove previously delivered content.
    async fn delete(
        &self,
        target: TargetId,
        reference: &DeliveryReference,
    ) -> Result<(), DeliveryError>;
}
