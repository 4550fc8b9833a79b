//! Telegram client using teloxide.

use async_trait::async_trait;
use teloxide::RequestError;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, ParseMode};
use tracing::{info, warn};

/// The outbound half of the chat platform the bot needs.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send an HTML-formatted message.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), String>;

    /// Send a PNG with an optional HTML caption.
    async fn send_photo(&self, chat_id: i64, png: Vec<u8>, caption: Option<&str>) -> Result<(), String>;

    /// Fetch a file's bytes by its Telegram file id.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, String>;
}

/// Why `setWebhook` did not go through.
#[derive(Debug)]
pub enum SetWebhookError {
    /// Telegram answered and said no.
    Rejected(String),
    /// We never got an answer.
    Transport(String),
}

/// Telegram API client.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Point Telegram's update delivery at `url`.
    pub async fn set_webhook(&self, url: reqwest::Url) -> Result<(), SetWebhookError> {
        info!("🔗 Setting webhook to {}", url);
        self.bot.set_webhook(url).await.map(|_| ()).map_err(|e| match e {
            RequestError::Api(api) => {
                warn!("Webhook rejected: {api}");
                SetWebhookError::Rejected(api.to_string())
            }
            other => {
                warn!("Failed to set webhook: {other}");
                SetWebhookError::Transport(other.to_string())
            }
        })
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), String> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }

    async fn send_photo(&self, chat_id: i64, png: Vec<u8>, caption: Option<&str>) -> Result<(), String> {
        info!("📷 Sending chart to chat {} ({} bytes)", chat_id, png.len());

        let input_file = InputFile::memory(png).file_name("chart.png");
        let mut request = self.bot.send_photo(ChatId(chat_id), input_file);

        if let Some(cap) = caption {
            request = request.caption(cap).parse_mode(ParseMode::Html);
        }

        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send photo: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, String> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| format!("Failed to get file info: {e}"))?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .map_err(|e| format!("Failed to download file: {e}"))?;

        info!("📥 Downloaded file ({} bytes)", data.len());
        Ok(data)
    }
}
