//! [`DeliveryGateway`] over the Telegram Bot API.
//!
//! Photos and videos are re-sent by Telegram file id, so nothing is uploaded.
//! The delivery reference is the sent message id in decimal.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};
use teloxide::RequestError;
use tracing::debug;

use courier_core::{DeliveryError, DeliveryGateway, DeliveryReference, MessageKind, TargetId};

#[derive(Clone)]
pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl DeliveryGateway for TelegramGateway {
    async fn send(
        &self,
        target: TargetId,
        content: &str,
        kind: MessageKind,
    ) -> Result<DeliveryReference, DeliveryError> {
        let chat_id = ChatId(target.get());
        let sent = match kind {
            MessageKind::Text => self.bot.send_message(chat_id, content).await,
            MessageKind::Photo => {
                self.bot
                    .send_photo(chat_id, InputFile::file_id(content.to_owned()))
                    .await
            }
            MessageKind::Video => {
                self.bot
                    .send_video(chat_id, InputFile::file_id(content.to_owned()))
                    .await
            }
        }
        .map_err(to_delivery_error)?;

        debug!(target = %target, message_id = sent.id.0, %kind, "telegram: sent");
        Ok(message_reference(sent.id))
    }

    async fn delete(
        &self,
        target: TargetId,
        reference: &DeliveryReference,
    ) -> Result<(), DeliveryError> {
        let message_id = parse_reference(reference)?;
        self.bot
            .delete_message(ChatId(target.get()), message_id)
            .await
            .map_err(to_delivery_error)?;
        debug!(target = %target, message_id = message_id.0, "telegram: deleted");
        Ok(())
    }
}

fn message_reference(id: MessageId) -> DeliveryReference {
    DeliveryReference::new(id.0.to_string())
}

fn parse_reference(reference: &DeliveryReference) -> Result<MessageId, DeliveryError> {
    reference
        .as_str()
        .parse::<i32>()
        .map(MessageId)
        .map_err(|_| DeliveryError::BadReference(reference.as_str().to_owned()))
}

/// API refusals are permanent for that request; everything else is transport.
fn to_delivery_error(e: RequestError) -> DeliveryError {
    match e {
        RequestError::Api(api) => DeliveryError::Rejected(api.to_string()),
        other => DeliveryError::Transport(other.to_string()),
    }
}
