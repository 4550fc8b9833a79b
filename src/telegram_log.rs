//! Forward WARN and ERROR log events to an operator chat.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Telegram caps messages at 4096 characters.
const MAX_ALERT_CHARS: usize = 4000;

/// Alerts arriving this close together are sent as one message.
const COALESCE_WINDOW: Duration = Duration::from_secs(2);

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl TelegramLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut batch = vec![first];
                tokio::time::sleep(COALESCE_WINDOW).await;
                while let Ok(more) = rx.try_recv() {
                    batch.push(more);
                }
                send_alert(&bot, chat_id, &batch.join("\n")).await;
            }
        });

        Self { tx }
    }
}

fn truncate_alert(text: &str) -> String {
    if text.chars().count() > MAX_ALERT_CHARS {
        let truncated: String = text.chars().take(MAX_ALERT_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    }
}

async fn send_alert(bot: &Bot, chat_id: ChatId, text: &str) {
    // Plain text on purpose: log lines are not valid HTML.
    if let Err(e) = bot.send_message(chat_id, truncate_alert(text)).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message
                .push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

fn format_alert(level: Level, target: &str, message: &str) -> Option<String> {
    let icon = match level {
        Level::ERROR => "❌",
        Level::WARN => "⚠️",
        _ => return None,
    };
    Some(format!("{icon} [{target}] {message}"))
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // teloxide's own failures would loop back through the bot.
        if metadata.target().starts_with("teloxide") {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let Some(alert) = format_alert(*metadata.level(), metadata.target(), &visitor.message) else {
            return;
        };

        if self.tx.send(alert).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_warn_and_error_forwarded() {
        assert_eq!(
            format_alert(Level::ERROR, "expense_tracker_bot::server", "boom").as_deref(),
            Some("❌ [expense_tracker_bot::server] boom")
        );
        assert!(format_alert(Level::WARN, "x", "careful").unwrap().starts_with("⚠️"));
        assert!(format_alert(Level::INFO, "x", "fine").is_none());
        assert!(format_alert(Level::DEBUG, "x", "noise").is_none());
    }

    #[test]
    fn test_truncates_long_alerts() {
        let long = "é".repeat(MAX_ALERT_CHARS + 10);
        let out = truncate_alert(&long);
        assert_eq!(out.chars().count(), MAX_ALERT_CHARS + 3);
        assert!(out.ends_with("..."));
    }
}
