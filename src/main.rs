use teloxide::Bot;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use expense_tracker_bot::config::Config;
use expense_tracker_bot::server::{self, AppState};
use expense_tracker_bot::telegram_log;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let level = if config.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    // Keeps the file writer flushing until main returns.
    let mut _guard = None;
    let file_layer = config.log_dir.as_ref().map(|log_dir| {
        std::fs::create_dir_all(log_dir).ok();
        let appender = tracing_appender::rolling::daily(log_dir, "expense-bot.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        _guard = Some(guard);
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
    });

    let alert_layer = match (&config.telegram_bot_token, config.log_chat_id) {
        (Some(token), Some(chat_id)) => Some(telegram_log::TelegramLogLayer::new(Bot::new(token), chat_id)),
        _ => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into())),
        )
        .with(file_layer)
        .with(alert_layer)
        .init();

    let missing = config.missing_core_vars();
    if !missing.is_empty() {
        warn!("Missing environment variables: {}", missing.join(", "));
        warn!("Some features may be disabled");
    }
    if !config.token_looks_valid() {
        warn!("TELEGRAM_BOT_TOKEN doesn't look like 123456789:ABCdef...; Telegram calls may fail");
    }
    if config.sheets_configured() {
        info!("Ledger: Google Sheets");
    } else if let Some(path) = &config.ledger_db_path {
        info!("Ledger: SQLite at {:?}", path);
    } else {
        warn!("No ledger configured - expenses cannot be logged");
    }

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = server::router(AppState::from_config(config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    info!("🚀 Starting expense bot on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
        })
        .await
        .expect("Server error");
}
