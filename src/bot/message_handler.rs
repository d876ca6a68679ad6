//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info};

use crate::config::ConversationConfig;
use crate::conversation::{Event, Reply, SessionId};
use crate::conversation_errors::ServiceError;

use super::ui_builder::{create_choice_keyboard, format_help_message};
use super::{BotState, Command};

/// Send an engine reply, with its menu as an inline keyboard
pub async fn deliver_reply(bot: &Bot, chat_id: ChatId, reply: Reply) -> Result<(), ServiceError> {
    let request = bot.send_message(chat_id, reply.text);
    match reply.menu {
        Some(choices) => request.reply_markup(create_choice_keyboard(&choices)).await?,
        None => request.await?,
    };
    Ok(())
}

/// What a text message asks the bot to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextAction {
    /// Show usage, leaving the conversation untouched
    Help,
    /// A slash command the bot does not know, or one addressed to another bot
    UnknownCommand,
    /// Input for the conversation engine
    Event(Event),
}

/// Map the text of a message to the action it requests
pub fn classify_text(text: &str, bot_username: &str, config: &ConversationConfig) -> TextAction {
    match Command::parse(text, bot_username) {
        Ok(Command::Help) => TextAction::Help,
        Ok(Command::Start) | Ok(Command::Cancel) => TextAction::Event(Event::CancelRequested),
        Err(_) if text.trim_start().starts_with('/') => TextAction::UnknownCommand,
        Err(_) => TextAction::Event(Event::from_text(text, config)),
    }
}

/// Whether an engine error is a record store failure reported back to the user
pub fn is_record_store_failure(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::RecordStore(_))
    )
}

/// Feed an event to the conversation engine and deliver its reply
pub async fn dispatch_event(
    bot: &Bot,
    chat_id: ChatId,
    event: Event,
    language_code: Option<&str>,
    state: &BotState,
) -> Result<()> {
    match state
        .engine
        .handle_event(SessionId::from(chat_id), event, language_code)
        .await
    {
        Ok(reply) => {
            debug!(user_id = %chat_id, reply_kind = ?reply.kind, "Sending conversation reply");
            deliver_reply(bot, chat_id, reply).await?;
        }
        Err(e) if is_record_store_failure(&e) => {
            error!(user_id = %chat_id, error = ?e, "Failed to record receipt");
            bot.send_message(
                chat_id,
                state
                    .localization
                    .get_message("error-record-store", language_code, None),
            )
            .await
            .map_err(ServiceError::from)?;
        }
        Err(e) => return Err(e),
    }

    Ok(())
}

async fn handle_unknown_command(
    bot: &Bot,
    chat_id: ChatId,
    language_code: Option<&str>,
    state: &BotState,
) -> Result<()> {
    let reply = state
        .engine
        .reprompt(SessionId::from(chat_id), "unknown-command", language_code)
        .await?;

    match reply {
        Some(reply) => deliver_reply(bot, chat_id, reply).await?,
        None => {
            bot.send_message(
                chat_id,
                state
                    .localization
                    .get_message("unknown-command", language_code, None),
            )
            .await
            .map_err(ServiceError::from)?;
        }
    }

    Ok(())
}

async fn handle_text_message(bot: &Bot, msg: &Message, text: &str, state: &BotState) -> Result<()> {
    debug!(user_id = %msg.chat.id, message_length = text.len(), "Received text message from user");

    // Extract user's language code from Telegram
    let language_code = msg
        .from
        .as_ref()
        .and_then(|user| user.language_code.as_ref())
        .map(|s| s.as_str());

    match classify_text(text, &state.bot_username, &state.conversation) {
        TextAction::Help => {
            let help_message = format_help_message(
                &state.localization,
                language_code,
                &Command::descriptions().to_string(),
            );
            bot.send_message(msg.chat.id, help_message)
                .await
                .map_err(ServiceError::from)?;
            Ok(())
        }
        TextAction::UnknownCommand => {
            info!(user_id = %msg.chat.id, command = %text, "Ignoring unknown command");
            handle_unknown_command(bot, msg.chat.id, language_code, state).await
        }
        TextAction::Event(event) => {
            if event == Event::CancelRequested {
                info!(user_id = %msg.chat.id, "Restart requested");
            }
            dispatch_event(bot, msg.chat.id, event, language_code, state).await
        }
    }
}

async fn handle_unsupported_message(bot: &Bot, msg: &Message, state: &BotState) -> Result<()> {
    let language_code = msg
        .from
        .as_ref()
        .and_then(|user| user.language_code.as_ref())
        .map(|s| s.as_str());

    debug!(user_id = %msg.chat.id, "Received unsupported message type from user");

    bot.send_message(
        msg.chat.id,
        state
            .localization
            .get_message("unsupported-message", language_code, None),
    )
    .await
    .map_err(ServiceError::from)?;
    Ok(())
}

pub async fn message_handler(bot: Bot, msg: Message, state: BotState) -> Result<()> {
    match msg.text() {
        Some(text) => handle_text_message(&bot, &msg, text, &state).await?,
        None => handle_unsupported_message(&bot, &msg, &state).await?,
    }

    Ok(())
}
