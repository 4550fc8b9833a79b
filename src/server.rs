//! HTTP surface: health check, Telegram webhook, webhook registration.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::tracker::event::{InboundEvent, Skip};
use crate::tracker::gemini::{ExpenseExtractor, GeminiClient, GenerativeModel};
use crate::tracker::ledger::{self, Ledger, LedgerFactory};
use crate::tracker::replies;
use crate::tracker::telegram::{Messenger, SetWebhookError, TelegramClient};
use crate::tracker::ExpenseBot;

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` when no bot token is configured.
    pub telegram: Option<TelegramClient>,
    pub messenger: Option<Arc<dyn Messenger>>,
    pub model: Option<Arc<dyn GenerativeModel>>,
    pub ledger_factory: Option<LedgerFactory>,
}

impl AppState {
    /// Wire up the real clients from configuration.
    pub fn from_config(config: Config) -> Self {
        let telegram = config
            .telegram_bot_token
            .as_ref()
            .map(|token| TelegramClient::new(teloxide::Bot::new(token)));
        let messenger = telegram
            .clone()
            .map(|client| Arc::new(client) as Arc<dyn Messenger>);
        let model = config.gemini_api_key.as_ref().map(|key| {
            Arc::new(GeminiClient::new(key.clone(), config.gemini_model.clone())) as Arc<dyn GenerativeModel>
        });
        let ledger_factory = ledger::factory_from_config(&config);

        Self {
            config: Arc::new(config),
            telegram,
            messenger,
            model,
            ledger_factory,
        }
    }

    /// A fresh bot for one event. Nothing but configuration is shared
    /// between events.
    fn expense_bot(&self, messenger: Arc<dyn Messenger>) -> ExpenseBot {
        let tz = self.config.timezone;
        ExpenseBot::new(
            messenger,
            ExpenseExtractor::new(self.model.clone(), tz),
            Ledger::new(self.ledger_factory.clone(), tz),
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/webhook", post(telegram_webhook))
        .route("/set_webhook", post(set_webhook))
        .with_state(state)
}

type JsonResponse = (StatusCode, Json<Value>);

fn ok() -> JsonResponse {
    (StatusCode::OK, Json(json!({ "status": "OK" })))
}

async fn health_check() -> JsonResponse {
    info!("Health check requested");
    (
        StatusCode::OK,
        Json(json!({ "status": "OK", "message": "Finance Tracker Bot is running" })),
    )
}

async fn telegram_webhook(State(state): State<AppState>, body: Bytes) -> JsonResponse {
    let Some(messenger) = state.messenger.clone() else {
        error!("TELEGRAM_BOT_TOKEN not configured");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Bot not configured" })),
        );
    };

    let event = match InboundEvent::from_update(&body) {
        Ok(event) => event,
        Err(Skip::NoChatId) => {
            warn!("No chat_id found in message");
            return ok();
        }
        Err(skip) => {
            info!("Not a message event or invalid data ({:?})", skip);
            return ok();
        }
    };

    let chat_id = event.chat_id;
    let bot = state.expense_bot(messenger.clone());

    // Telegram redelivers anything that isn't a 200, so a panic while
    // handling must still end in an acknowledgment.
    if let Err(panic) = AssertUnwindSafe(bot.handle(event)).catch_unwind().await {
        let detail = panic
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| panic.downcast_ref::<&str>().copied())
            .unwrap_or("unknown panic");
        error!("Error in webhook handler for chat {chat_id}: {detail}");
        if let Err(e) = messenger.send_message(chat_id, replies::COULD_NOT_PROCESS).await {
            warn!("Failure notice not delivered: {e}");
        }
    }

    ok()
}

#[derive(Deserialize)]
struct SetWebhookRequest {
    webhook_url: Option<String>,
}

async fn set_webhook(State(state): State<AppState>, body: Bytes) -> JsonResponse {
    let internal = |message: String| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message })));

    let Some(telegram) = state.telegram.as_ref() else {
        return internal("TELEGRAM_BOT_TOKEN not configured".to_string());
    };

    let request: SetWebhookRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return internal(format!("invalid request body: {e}")),
    };
    // A readable body with a bad field is the caller's mistake.
    let bad_request = |message: String| (StatusCode::BAD_REQUEST, Json(json!({ "error": message })));
    let Some(raw_url) = request.webhook_url.filter(|u| !u.trim().is_empty()) else {
        return bad_request("webhook_url required".to_string());
    };
    let url = match reqwest::Url::parse(raw_url.trim()) {
        Ok(url) => url,
        Err(e) => return bad_request(format!("invalid webhook_url: {e}")),
    };

    match telegram.set_webhook(url).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "message": "Webhook set successfully" })),
        ),
        Err(SetWebhookError::Rejected(description)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": description })),
        ),
        Err(SetWebhookError::Transport(message)) => internal(message),
    }
}
