//! UI Builder module for creating keyboards and formatting messages

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::conversation::MenuChoice;
use crate::localization::LocalizationManager;

/// Create an inline keyboard with one button per row for a choice menu
pub fn create_choice_keyboard(choices: &[MenuChoice]) -> InlineKeyboardMarkup {
    let buttons: Vec<Vec<InlineKeyboardButton>> = choices
        .iter()
        .map(|choice| {
            vec![InlineKeyboardButton::callback(
                choice.label.clone(),
                choice.id.clone(),
            )]
        })
        .collect();

    InlineKeyboardMarkup::new(buttons)
}

/// Format the /help message
pub fn format_help_message(
    localization: &LocalizationManager,
    language_code: Option<&str>,
    commands: &str,
) -> String {
    format!(
        "ℹ️ {}\n\n{}",
        localization.get_message("help-text", language_code, None),
        commands
    )
}
