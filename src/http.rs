//! HTTP listener: liveness check and Telegram webhook delivery

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use teloxide::types::Update;
use teloxide::Bot;
use tracing::{debug, error, info, warn};

use crate::bot::{handle_update, BotState};

/// Header carrying the secret registered together with the webhook
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Dependencies of the webhook route
#[derive(Clone)]
pub struct WebhookState {
    pub bot: Bot,
    pub bot_state: BotState,
    pub secret: Option<String>,
}

/// Router serving the health check only
pub fn health_router() -> Router {
    Router::new().route("/", get(health_check))
}

/// Router serving the health check and the webhook at `path`
pub fn webhook_router(path: &str, state: WebhookState) -> Router {
    let webhook = Router::new()
        .route(path, post(receive_update))
        .with_state(state);

    health_router().merge(webhook)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

async fn receive_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(secret) = &state.secret {
        let provided = headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(secret.as_str()) {
            warn!("Rejected webhook call with a missing or wrong secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Rejected malformed webhook payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    debug!(update_id = ?update.id, "Received webhook update");
    if let Err(e) = handle_update(state.bot, update, state.bot_state).await {
        // Telegram would redeliver on a non-2xx status; the failure is ours to log
        error!(error = ?e, "Failed to handle webhook update");
    }

    StatusCode::OK
}

/// Serve `router` on `addr` until `shutdown` completes
pub async fn serve<F>(addr: SocketAddr, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {addr}"))?;
    info!(%addr, "HTTP listener started");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP listener failed")
}
