//! # Materials Telegram Bot
//!
//! A Telegram bot that walks warehouse staff through a material-receipt
//! questionnaire and appends each completed receipt to a Google spreadsheet.

pub mod bot;
pub mod config;
pub mod conversation;
pub mod conversation_errors;
pub mod dialogue;
pub mod http;
pub mod localization;
pub mod record_store;
pub mod sheets;
