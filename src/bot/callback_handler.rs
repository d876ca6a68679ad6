//! Callback Handler module for processing inline keyboard callback queries

use anyhow::Result;
use teloxide::prelude::*;
use tracing::{debug, error};

use crate::conversation::Event;
use crate::conversation_errors::ServiceError;

use super::message_handler::dispatch_event;
use super::BotState;

/// Handle callback queries from inline keyboards
pub async fn callback_handler(bot: Bot, q: CallbackQuery, state: BotState) -> Result<()> {
    debug!(user_id = %q.from.id, data = ?q.data, "Received callback query from user");

    let chat_id = match &q.message {
        Some(msg) => msg.chat().id,
        None => ChatId::from(q.from.id),
    };
    let language_code = q.from.language_code.as_deref();

    let result = async {
        let Some(data) = q.data.as_deref() else {
            return Ok(());
        };

        dispatch_event(
            &bot,
            chat_id,
            Event::ChoiceSelected(data.to_string()),
            language_code,
            &state,
        )
        .await?;

        // The menu has been answered; drop its buttons so it cannot be pressed again
        if let Some(msg) = &q.message {
            if let Err(e) = bot.edit_message_reply_markup(msg.chat().id, msg.id()).await {
                error!(user_id = %q.from.id, error = %e, "Failed to remove inline keyboard");
            }
        }

        Ok::<(), anyhow::Error>(())
    }
    .await;

    // Answer the callback query to remove the loading state
    bot.answer_callback_query(q.id)
        .await
        .map_err(ServiceError::from)?;

    result
}
