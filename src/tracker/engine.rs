//! Expense bot engine - turns one inbound message into one reply.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::tracker::chart;
use crate::tracker::event::{InboundEvent, Payload};
use crate::tracker::expense::Extraction;
use crate::tracker::gemini::{ExpenseExtractor, ExtractionInput};
use crate::tracker::image_prep::normalize_to_jpeg;
use crate::tracker::ledger::Ledger;
use crate::tracker::replies;
use crate::tracker::telegram::Messenger;

/// Recognized slash commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Summary,
    Setup,
    Refresh,
    Chart,
}

impl Command {
    /// Parse the first word of a message. `/summary@my_bot` is `/summary`.
    /// `None` for anything we don't know, which the bot ignores.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.split('@').next().unwrap_or(word);
        match name {
            "/start" => Some(Command::Start),
            "/summary" => Some(Command::Summary),
            "/setup" => Some(Command::Setup),
            "/refresh" | "/update_totals" => Some(Command::Refresh),
            "/chart" | "/graph" => Some(Command::Chart),
            _ => None,
        }
    }
}

/// Where an image came from; only changes the wording of failures.
#[derive(Debug, Clone, Copy)]
enum ImageSource {
    Photo,
    Document,
}

impl ImageSource {
    fn download_failed(self) -> &'static str {
        match self {
            Self::Photo => replies::PHOTO_DOWNLOAD_FAILED,
            Self::Document => replies::DOCUMENT_DOWNLOAD_FAILED,
        }
    }

    fn process_failed(self) -> &'static str {
        match self {
            Self::Photo => replies::PHOTO_PROCESS_FAILED,
            Self::Document => replies::DOCUMENT_PROCESS_FAILED,
        }
    }
}

/// Handles a single webhook event. Build one per request.
pub struct ExpenseBot {
    messenger: Arc<dyn Messenger>,
    extractor: ExpenseExtractor,
    ledger: Ledger,
}

impl ExpenseBot {
    pub fn new(messenger: Arc<dyn Messenger>, extractor: ExpenseExtractor, ledger: Ledger) -> Self {
        Self {
            messenger,
            extractor,
            ledger,
        }
    }

    pub async fn handle(&self, event: InboundEvent) {
        let chat_id = event.chat_id;
        match event.payload {
            Payload::Photo(file_id) => {
                info!("📷 Photo from chat {chat_id}");
                self.handle_image(chat_id, &file_id, ImageSource::Photo).await;
            }
            Payload::Document {
                file_id,
                mime_type: Some(mime),
            } if mime.starts_with("image/") => {
                info!("📄 Image document ({mime}) from chat {chat_id}");
                self.handle_image(chat_id, &file_id, ImageSource::Document).await;
            }
            Payload::Document { mime_type, .. } => {
                info!("Rejecting non-image document ({:?}) from chat {chat_id}", mime_type);
                self.reply(chat_id, replies::SEND_AN_IMAGE).await;
            }
            Payload::Text(text) if text.starts_with('/') => {
                self.handle_command(chat_id, &text).await;
            }
            Payload::Text(text) => {
                info!("💬 Text from chat {chat_id}");
                let extraction = self.extractor.extract(ExtractionInput::Text(&text)).await;
                self.handle_extraction(chat_id, extraction).await;
            }
            Payload::Unsupported => {
                self.reply(chat_id, replies::COULD_NOT_PROCESS).await;
            }
        }
    }

    async fn handle_image(&self, chat_id: i64, file_id: &str, source: ImageSource) {
        let raw = match self.messenger.download_file(file_id).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("Error downloading Telegram file: {e}");
                self.reply(chat_id, source.download_failed()).await;
                return;
            }
        };

        let jpeg = match normalize_to_jpeg(&raw) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                error!("Error processing image: {e}");
                self.reply(chat_id, source.process_failed()).await;
                return;
            }
        };

        let extraction = self.extractor.extract(ExtractionInput::Image(&jpeg)).await;
        self.handle_extraction(chat_id, extraction).await;
    }

    async fn handle_extraction(&self, chat_id: i64, extraction: Extraction) {
        let record = match extraction {
            Extraction::Expense(record) => record,
            Extraction::Failed(message) => {
                info!("Extraction failed for chat {chat_id}: {message}");
                self.reply(chat_id, &replies::extraction_failed(&message)).await;
                return;
            }
        };

        if self.ledger.append(&record).await {
            info!("✅ Logged expense for chat {chat_id}");
            self.reply(chat_id, &replies::expense_logged(&record)).await;
        } else {
            self.reply(chat_id, replies::LOG_FAILED).await;
        }
    }

    async fn handle_command(&self, chat_id: i64, text: &str) {
        let Some(command) = Command::parse(text) else {
            info!("Ignoring unknown command from chat {chat_id}");
            return;
        };
        info!("⌨️ {:?} from chat {chat_id}", command);

        if command == Command::Start {
            self.reply(chat_id, replies::WELCOME).await;
            return;
        }

        if !self.ledger.is_configured() {
            self.reply(chat_id, replies::NOT_CONFIGURED).await;
            return;
        }

        match command {
            Command::Start => {}
            Command::Summary => match self.ledger.monthly_aggregate(None).await {
                Some(summary) => self.reply(chat_id, &replies::monthly_summary(&summary)).await,
                None => self.reply(chat_id, replies::SUMMARY_FAILED).await,
            },
            Command::Setup => {
                let msg = if self.ledger.ensure_schema().await {
                    replies::SETUP_DONE
                } else {
                    replies::SETUP_FAILED
                };
                self.reply(chat_id, msg).await;
            }
            Command::Refresh => {
                let msg = if self.ledger.recompute_all().await {
                    replies::REFRESH_DONE
                } else {
                    replies::REFRESH_FAILED
                };
                self.reply(chat_id, msg).await;
            }
            Command::Chart => self.send_chart(chat_id).await,
        }
    }

    async fn send_chart(&self, chat_id: i64) {
        let Some(summary) = self.ledger.monthly_aggregate(None).await else {
            self.reply(chat_id, replies::CHART_FAILED).await;
            return;
        };
        if chart::layout(&summary).is_empty() {
            self.reply(chat_id, replies::NO_CHART_DATA).await;
            return;
        }

        self.reply(chat_id, replies::CREATING_CHART).await;
        let png = match chart::render(&summary) {
            Ok(Some(png)) => png,
            Ok(None) => {
                self.reply(chat_id, replies::NO_CHART_DATA).await;
                return;
            }
            Err(e) => {
                error!("Error creating monthly chart: {e}");
                self.reply(chat_id, replies::CHART_FAILED).await;
                return;
            }
        };

        let caption = replies::chart_caption(&summary);
        if let Err(e) = self.messenger.send_photo(chat_id, png, Some(&caption)).await {
            warn!("Chart not delivered to chat {chat_id}: {e}");
        }
    }

    /// Send a text reply. Delivery failures are logged, never raised.
    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.messenger.send_message(chat_id, text).await {
            warn!("Reply not delivered to chat {chat_id}: {e}");
        }
    }
}
