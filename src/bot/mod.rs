//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `message_handler`: Handles incoming text messages and commands
//! - `callback_handler`: Handles inline keyboard callback queries
//! - `ui_builder`: Creates keyboards and formats messages

use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{Update, UpdateKind};
use teloxide::utils::command::BotCommands;
use tracing::debug;

use crate::config::ConversationConfig;
use crate::conversation::ConversationEngine;
use crate::localization::LocalizationManager;

pub mod callback_handler;
pub mod message_handler;
pub mod ui_builder;

// Re-export main handler functions for use in main.rs and the webhook listener
pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

/// Commands understood by the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "start a new material receipt")]
    Start,
    #[command(description = "discard the current receipt and start over")]
    Cancel,
    #[command(description = "show how the bot works")]
    Help,
}

/// Dependencies shared by the update handlers
#[derive(Clone)]
pub struct BotState {
    pub engine: Arc<ConversationEngine>,
    pub localization: Arc<LocalizationManager>,
    pub conversation: Arc<ConversationConfig>,
    /// Username of the bot, accepted in `/command@username` mentions
    pub bot_username: Arc<str>,
}

impl BotState {
    pub fn new(
        engine: Arc<ConversationEngine>,
        localization: Arc<LocalizationManager>,
        conversation: ConversationConfig,
        bot_username: &str,
    ) -> Self {
        Self {
            engine,
            localization,
            conversation: Arc::new(conversation),
            bot_username: Arc::from(bot_username),
        }
    }
}

/// Route one update to its handler, used when updates arrive over the webhook
pub async fn handle_update(bot: Bot, update: Update, state: BotState) -> anyhow::Result<()> {
    match update.kind {
        UpdateKind::Message(msg) => message_handler(bot, msg, state).await,
        UpdateKind::CallbackQuery(q) => callback_handler(bot, q, state).await,
        other => {
            debug!(update_kind = ?other, "Ignoring unsupported update");
            Ok(())
        }
    }
}
