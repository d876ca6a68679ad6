use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use materials::bot::{self, BotState, Command};
use materials::config::{BotConfig, WebhookConfig};
use materials::conversation::{ConversationEngine, StepTable};
use materials::http::{self, WebhookState};
use materials::localization::LocalizationManager;
use materials::sheets::SheetsRecordStore;

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "materials=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false),
            )
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for the shutdown signal");
    }
}

async fn run_polling(bot: Bot, state: BotState, config: &BotConfig) -> Result<()> {
    let health = tokio::spawn(http::serve(
        config.http_bind_addr,
        http::health_router(),
        shutdown_signal(),
    ));

    info!("Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(bot::message_handler))
        .branch(Update::filter_callback_query().endpoint(bot::callback_handler));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    health.await??;
    Ok(())
}

async fn run_webhook(
    bot: Bot,
    state: BotState,
    config: &BotConfig,
    webhook: &WebhookConfig,
) -> Result<()> {
    let mut request = bot.set_webhook(webhook.url.clone());
    if let Some(secret) = &webhook.secret {
        request = request.secret_token(secret.clone());
    }
    request.await?;
    info!(url = %webhook.url, path = %webhook.path, "Webhook registered");

    let router = http::webhook_router(
        &webhook.path,
        WebhookState {
            bot,
            bot_state: state,
            secret: webhook.secret.clone(),
        },
    );

    http::serve(config.http_bind_addr, router, shutdown_signal()).await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = BotConfig::from_env()?;
    init_tracing(config.json_logs);

    info!("Starting Materials Telegram Bot");

    let localization = Arc::new(LocalizationManager::new(
        &config.conversation.default_language,
    )?);

    info!(
        spreadsheet_id = %config.sheets.spreadsheet_id,
        sheet = %config.sheets.sheet_name,
        "Initializing record store"
    );
    let store = Arc::new(SheetsRecordStore::from_config(&config.sheets)?);

    let engine = Arc::new(ConversationEngine::new(
        StepTable::receipt()?,
        store,
        Arc::clone(&localization),
    ));
    let bot = Bot::new(&config.telegram_token);
    let me = bot
        .get_me()
        .await
        .context("Failed to fetch the bot account from Telegram")?;
    let bot_username = me.user.username.clone().unwrap_or_default();
    info!(username = %bot_username, "Authenticated with Telegram");

    let state = BotState::new(
        engine,
        localization,
        config.conversation.clone(),
        &bot_username,
    );

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(error = %e, "Failed to register bot commands");
    }

    match &config.webhook {
        Some(webhook) => run_webhook(bot, state, &config, webhook).await,
        None => run_polling(bot, state, &config).await,
    }
}
