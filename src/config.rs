//! # Bot Configuration Module
//!
//! This module defines the runtime configuration of the bot: Telegram access,
//! the Google Sheets target, the HTTP listener and conversation settings.
//! Values come from the process environment (optionally seeded from `.env`).

use anyhow::{anyhow, Context, Result};
use std::env;
use std::net::SocketAddr;

// Defaults for optional settings
pub const DEFAULT_CREDENTIALS_FILE: &str = "credenciais.json";
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";
pub const DEFAULT_HTTP_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_WEBHOOK_PATH: &str = "/webhook";
pub const DEFAULT_CANCEL_KEYWORDS: &[&str] = &["cancelar", "cancel"];
pub const DEFAULT_LANGUAGE: &str = "pt";

/// Google Sheets destination for completed receipts
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    /// Spreadsheet id (the long token in the spreadsheet URL)
    pub spreadsheet_id: String,
    /// Sheet (tab) receiving the appended rows
    pub sheet_name: String,
    /// Path to the service account JSON key
    pub credentials_file: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            credentials_file: DEFAULT_CREDENTIALS_FILE.to_string(),
        }
    }
}

/// Webhook delivery settings, present only when the bot runs in webhook mode
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Public URL Telegram posts updates to
    pub url: reqwest::Url,
    /// Local route serving the webhook
    pub path: String,
    /// Value expected in the `X-Telegram-Bot-Api-Secret-Token` header
    pub secret: Option<String>,
}

/// Conversation behaviour settings
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Lowercased words that cancel the running conversation
    pub cancel_keywords: Vec<String>,
    /// Language used when the user's Telegram language is unknown or unsupported
    pub default_language: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            cancel_keywords: DEFAULT_CANCEL_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
            default_language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

impl ConversationConfig {
    /// Whether `text` is one of the cancel keywords (case and surrounding whitespace ignored)
    pub fn is_cancel_keyword(&self, text: &str) -> bool {
        let input = text.trim().to_lowercase();
        self.cancel_keywords.iter().any(|k| *k == input)
    }
}

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    pub sheets: SheetsConfig,
    pub http_bind_addr: SocketAddr,
    pub webhook: Option<WebhookConfig>,
    pub conversation: ConversationConfig,
    /// Emit JSON log lines instead of the human readable format
    pub json_logs: bool,
}

impl BotConfig {
    /// Load the configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let telegram_token = var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;

        let defaults = SheetsConfig::default();
        let sheets = SheetsConfig {
            spreadsheet_id: var("GOOGLE_SPREADSHEET_ID")
                .context("GOOGLE_SPREADSHEET_ID must be set")?,
            sheet_name: var("GOOGLE_SHEET_NAME").unwrap_or(defaults.sheet_name),
            credentials_file: var("GOOGLE_CREDENTIALS_FILE").unwrap_or(defaults.credentials_file),
        };

        let http_bind_addr = var("HTTP_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDR.to_string())
            .parse()
            .context("HTTP_BIND_ADDR must be a socket address such as 0.0.0.0:8080")?;

        let webhook = match var("WEBHOOK_URL") {
            Some(url) => {
                let url = reqwest::Url::parse(&url).context("WEBHOOK_URL is not a valid URL")?;
                if url.path() == "/" {
                    return Err(anyhow!(
                        "WEBHOOK_URL must include a path such as {DEFAULT_WEBHOOK_PATH}"
                    ));
                }

                // The route must be the one Telegram posts to
                let path = match var("WEBHOOK_PATH") {
                    Some(mut path) => {
                        if !path.starts_with('/') {
                            path.insert(0, '/');
                        }
                        if path != url.path() {
                            return Err(anyhow!(
                                "WEBHOOK_PATH {path} does not match the path of WEBHOOK_URL {}",
                                url.path()
                            ));
                        }
                        path
                    }
                    None => url.path().to_string(),
                };
                Some(WebhookConfig {
                    url,
                    path,
                    secret: var("WEBHOOK_SECRET"),
                })
            }
            None => None,
        };

        let mut conversation = ConversationConfig::default();
        if let Some(keywords) = var("CANCEL_KEYWORDS") {
            conversation.cancel_keywords = keywords
                .split(',')
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(language) = var("DEFAULT_LANGUAGE") {
            conversation.default_language = language.trim().to_lowercase();
        }

        let json_logs = var("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json"));

        Ok(Self {
            telegram_token,
            sheets,
            http_bind_addr,
            webhook,
            conversation,
            json_logs,
        })
    }
}
