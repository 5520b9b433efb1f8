//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling event
//! loop. Long polling, so no public URL is required.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::info;

use courier_core::config::TelegramConfig;

use crate::context::CourierContext;
use crate::error::TelegramError;
use crate::gateway::TelegramGateway;
use crate::handler::{handle_callback, handle_message};

pub struct TelegramAdapter {
    bot: Bot,
    ctx: Arc<CourierContext>,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig, ctx: Arc<CourierContext>) -> Result<Self, TelegramError> {
        if config.bot_token.trim().is_empty() {
            return Err(TelegramError::NoToken);
        }
        Ok(Self {
            bot: Bot::new(&config.bot_token),
            ctx,
        })
    }

    /// Build the adapter and check the token against the Bot API.
    pub async fn connect(
        config: &TelegramConfig,
        ctx: Arc<CourierContext>,
    ) -> Result<Self, TelegramError> {
        let adapter = Self::new(config, ctx)?;
        let me = adapter.bot.get_me().await?;
        info!(username = %me.username(), "Telegram: authenticated");
        Ok(adapter)
    }

    /// Gateway sharing this adapter's bot, for the dispatcher.
    pub fn gateway(&self) -> TelegramGateway {
        TelegramGateway::new(self.bot.clone())
    }

    /// Drive the long-polling loop until ctrl-c.
    pub async fn run(self) {
        info!("Telegram: starting long-polling dispatcher");

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(handle_message))
            .branch(Update::filter_callback_query().endpoint(handle_callback));

        Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.ctx])
            .default_handler(|_upd| async {})
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        info!("Telegram: dispatcher stopped");
    }
}
