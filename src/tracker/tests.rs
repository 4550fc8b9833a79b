//! Scenario tests for the expense bot engine.
//!
//! Run with: cargo test tracker

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono_tz::Tz;

use super::*;
use crate::tracker::ledger::SqliteLedger;

const TZ: Tz = chrono_tz::Asia::Kuala_Lumpur;

// =============================================================================
// FAKES
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Text(i64, String),
    Photo(i64, usize, Option<String>),
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    files: Mutex<Vec<(String, Vec<u8>)>>,
    downloads: Mutex<Vec<String>>,
}

impl RecordingMessenger {
    fn with_file(file_id: &str, bytes: Vec<u8>) -> Arc<Self> {
        let messenger = Self::default();
        messenger.files.lock().unwrap().push((file_id.to_string(), bytes));
        Arc::new(messenger)
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(_, t) => Some(t),
                Sent::Photo(..) => None,
            })
            .collect()
    }

    fn only_text(&self) -> String {
        let sent = self.sent();
        assert_eq!(sent.len(), 1, "expected exactly one reply, got {:?}", sent);
        match &sent[0] {
            Sent::Text(_, t) => t.clone(),
            other => panic!("expected text, got {:?}", other),
        }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), String> {
        self.sent.lock().unwrap().push(Sent::Text(chat_id, text.to_string()));
        Ok(())
    }

    async fn send_photo(&self, chat_id: i64, png: Vec<u8>, caption: Option<&str>) -> Result<(), String> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Photo(chat_id, png.len(), caption.map(str::to_string)));
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, String> {
        self.downloads.lock().unwrap().push(file_id.to_string());
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == file_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| "file not found".to_string())
    }
}

/// Model that always answers with the same text and records what it saw.
struct ScriptedModel {
    reply: String,
    calls: Mutex<Vec<(String, Option<Vec<u8>>)>>,
}

impl ScriptedModel {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn generate(&self, prompt: &str, image: Option<&[u8]>) -> Result<Option<String>, String> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), image.map(<[u8]>::to_vec)));
        Ok(Some(self.reply.clone()))
    }
}

fn sqlite_factory(store: Arc<SqliteLedger>) -> LedgerFactory {
    Arc::new(move || -> Result<Arc<dyn LedgerStore>, ledger::LedgerError> { Ok(store.clone()) })
}

struct Harness {
    messenger: Arc<RecordingMessenger>,
    model: Arc<ScriptedModel>,
    store: Option<Arc<SqliteLedger>>,
}

impl Harness {
    fn new(model_reply: &str) -> Self {
        Self {
            messenger: Arc::new(RecordingMessenger::default()),
            model: ScriptedModel::new(model_reply),
            store: Some(Arc::new(SqliteLedger::in_memory().unwrap())),
        }
    }

    fn without_store(mut self) -> Self {
        self.store = None;
        self
    }

    fn with_messenger(mut self, messenger: Arc<RecordingMessenger>) -> Self {
        self.messenger = messenger;
        self
    }

    fn bot(&self) -> ExpenseBot {
        let model: Arc<dyn GenerativeModel> = self.model.clone();
        ExpenseBot::new(
            self.messenger.clone(),
            ExpenseExtractor::new(Some(model), TZ),
            Ledger::new(self.store.clone().map(sqlite_factory), TZ),
        )
    }

    fn current_month(&self) -> String {
        Ledger::new(None, TZ).current_month()
    }

    async fn send(&self, payload: Payload) {
        self.bot().handle(InboundEvent { chat_id: 99, payload }).await;
    }

    async fn text(&self, text: &str) {
        self.send(Payload::Text(text.to_string())).await;
    }
}

fn today() -> String {
    ExpenseExtractor::new(None, TZ).today().format("%Y-%m-%d").to_string()
}

fn rgba_png() -> Vec<u8> {
    let img = image::ImageBuffer::from_pixel(8, 8, image::Rgba([10u8, 200, 30, 0]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .unwrap();
    buf
}

// =============================================================================
// TEXT EXPENSES
// =============================================================================

mod text_expenses {
    use super::*;

    #[tokio::test]
    async fn test_lunch_scenario() {
        let reply = format!(
            r#"```json
{{"amount": 15.0, "category": "food", "description": "Lunch", "date": "{}", "merchant": ""}}
```"#,
            today()
        );
        let h = Harness::new(&reply);

        h.text("Lunch $15").await;

        let msg = h.messenger.only_text();
        assert!(msg.contains("Expense Logged"));
        assert!(msg.contains("15.0"));
        assert!(msg.contains("Food"));
        assert!(msg.contains("Lunch"));
        assert!(msg.contains(&today()));

        let summary = h
            .store
            .as_ref()
            .unwrap()
            .monthly_aggregate(&h.current_month())
            .await
            .unwrap();
        assert_eq!(summary.get(Category::Food), 15.0);
        assert_eq!(summary.total, 15.0);
    }

    #[tokio::test]
    async fn test_model_error_relayed_and_nothing_logged() {
        let h = Harness::new(r#"{"error": "Not a valid expense"}"#);

        h.text("how are you").await;

        assert_eq!(h.messenger.only_text(), "❌ Not a valid expense");
        let summary = h
            .store
            .as_ref()
            .unwrap()
            .monthly_aggregate(&h.current_month())
            .await
            .unwrap();
        assert!(summary.is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_reply() {
        let h = Harness::new("Sure! The amount is 15.");
        h.text("Lunch $15").await;
        assert_eq!(h.messenger.only_text(), "❌ Failed to parse AI response");
    }

    #[tokio::test]
    async fn test_no_store_reports_log_failure() {
        let h = Harness::new(r#"{"amount": 3, "category": "transport"}"#).without_store();
        h.text("bus 3").await;
        assert_eq!(h.messenger.only_text(), replies::LOG_FAILED);
    }

    #[tokio::test]
    async fn test_no_ai_key() {
        let h = Harness::new("{}");
        let bot = ExpenseBot::new(
            h.messenger.clone(),
            ExpenseExtractor::new(None, TZ),
            Ledger::new(None, TZ),
        );
        bot.handle(InboundEvent {
            chat_id: 1,
            payload: Payload::Text("Lunch $15".to_string()),
        })
        .await;
        assert_eq!(h.messenger.only_text(), "❌ AI service not available");
    }
}

// =============================================================================
// IMAGES AND DOCUMENTS
// =============================================================================

mod images {
    use super::*;

    #[tokio::test]
    async fn test_photo_is_normalized_before_extraction() {
        let messenger = RecordingMessenger::with_file("photo-1", rgba_png());
        let h = Harness::new(r#"{"amount": 42.1, "category": "shopping", "merchant": "IKEA"}"#)
            .with_messenger(messenger);

        h.send(Payload::Photo("photo-1".to_string())).await;

        let calls = h.model.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let image_bytes = calls[0].1.as_ref().expect("image sent to model");
        assert_eq!(image::guess_format(image_bytes).unwrap(), image::ImageFormat::Jpeg);

        let msg = h.messenger.only_text();
        assert!(msg.contains("42.1"));
        assert!(msg.contains("Shopping"));
        assert!(msg.contains("IKEA"));
        assert!(msg.contains("Description: N/A"));
    }

    #[tokio::test]
    async fn test_image_document_takes_image_path() {
        let messenger = RecordingMessenger::with_file("doc-1", rgba_png());
        let h = Harness::new(r#"{"amount": 5, "category": "food"}"#).with_messenger(messenger);

        h.send(Payload::Document {
            file_id: "doc-1".to_string(),
            mime_type: Some("image/png".to_string()),
        })
        .await;

        assert_eq!(h.model.call_count(), 1);
        assert!(h.messenger.only_text().contains("Expense Logged"));
    }

    #[tokio::test]
    async fn test_pdf_document_rejected_without_download() {
        let h = Harness::new("{}");
        h.send(Payload::Document {
            file_id: "doc-2".to_string(),
            mime_type: Some("application/pdf".to_string()),
        })
        .await;

        assert_eq!(h.messenger.only_text(), replies::SEND_AN_IMAGE);
        assert!(h.messenger.downloads.lock().unwrap().is_empty());
        assert_eq!(h.model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_document_without_mime_type_rejected() {
        let messenger = RecordingMessenger::with_file("doc-4", rgba_png());
        let h = Harness::new(r#"{"amount": 5, "category": "food"}"#).with_messenger(messenger);
        h.send(Payload::Document {
            file_id: "doc-4".to_string(),
            mime_type: None,
        })
        .await;

        assert_eq!(h.messenger.only_text(), replies::SEND_AN_IMAGE);
        assert!(h.messenger.downloads.lock().unwrap().is_empty());
        assert_eq!(h.model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_photo_download_failure() {
        let h = Harness::new("{}");
        h.send(Payload::Photo("missing".to_string())).await;
        assert_eq!(h.messenger.only_text(), replies::PHOTO_DOWNLOAD_FAILED);
        assert_eq!(h.model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_document_image() {
        let messenger = RecordingMessenger::with_file("doc-3", b"not really a png".to_vec());
        let h = Harness::new("{}").with_messenger(messenger);
        h.send(Payload::Document {
            file_id: "doc-3".to_string(),
            mime_type: Some("image/png".to_string()),
        })
        .await;
        assert_eq!(h.messenger.only_text(), replies::DOCUMENT_PROCESS_FAILED);
    }

    #[tokio::test]
    async fn test_unsupported_message() {
        let h = Harness::new("{}");
        h.send(Payload::Unsupported).await;
        assert_eq!(h.messenger.only_text(), replies::COULD_NOT_PROCESS);
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

mod commands {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/summary@expense_bot"), Some(Command::Summary));
        assert_eq!(Command::parse("/update_totals"), Some(Command::Refresh));
        assert_eq!(Command::parse("/graph please"), Some(Command::Chart));
        assert_eq!(Command::parse("/delete"), None);
        assert_eq!(Command::parse("/"), None);
    }

    #[tokio::test]
    async fn test_start_works_without_store() {
        let h = Harness::new("{}").without_store();
        h.text("/start").await;
        assert_eq!(h.messenger.only_text(), replies::WELCOME);
    }

    #[tokio::test]
    async fn test_unknown_command_is_silent() {
        let h = Harness::new("{}");
        h.text("/frobnicate").await;
        assert!(h.messenger.sent().is_empty());
        assert_eq!(h.model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_store_commands_report_not_configured() {
        for cmd in ["/summary", "/setup", "/refresh", "/update_totals", "/chart", "/graph"] {
            let h = Harness::new("{}").without_store();
            h.text(cmd).await;
            assert_eq!(h.messenger.only_text(), replies::NOT_CONFIGURED, "{cmd}");
        }
    }

    #[tokio::test]
    async fn test_store_that_fails_to_build_is_not_configured() {
        let h = Harness::new("{}");
        let failing: LedgerFactory = Arc::new(|| -> Result<Arc<dyn LedgerStore>, ledger::LedgerError> {
            Err(ledger::LedgerError::Credentials("bad".to_string()))
        });
        let bot = ExpenseBot::new(
            h.messenger.clone(),
            ExpenseExtractor::new(None, TZ),
            Ledger::new(Some(failing), TZ),
        );
        bot.handle(InboundEvent {
            chat_id: 5,
            payload: Payload::Text("/summary".to_string()),
        })
        .await;
        assert_eq!(h.messenger.only_text(), replies::NOT_CONFIGURED);
    }

    #[tokio::test]
    async fn test_summary_reports_current_month() {
        let h = Harness::new(r#"{"amount": 7.5, "category": "entertainment", "description": "Movie"}"#);
        h.text("movie 7.50").await;
        h.text("/summary").await;

        let texts = h.messenger.texts();
        assert_eq!(texts.len(), 2);
        let summary = &texts[1];
        assert!(summary.contains(&format!("Monthly Summary ({})", h.current_month())));
        assert!(summary.contains("Entertainment: $7.50"));
        assert!(summary.contains("<b>Total:</b> $7.50"));
    }

    #[tokio::test]
    async fn test_setup_and_refresh() {
        let h = Harness::new("{}");
        h.text("/setup").await;
        h.text("/refresh").await;
        assert_eq!(
            h.messenger.texts(),
            vec![replies::SETUP_DONE.to_string(), replies::REFRESH_DONE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_chart_with_no_expenses() {
        let h = Harness::new("{}");
        h.text("/chart").await;
        assert_eq!(h.messenger.only_text(), replies::NO_CHART_DATA);
    }

    #[tokio::test]
    async fn test_chart_announces_then_sends_photo_with_caption() {
        let h = Harness::new(r#"{"amount": 20, "category": "utilities", "description": "Power"}"#);
        h.text("electricity 20").await;
        h.text("/graph").await;

        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1], Sent::Text(99, replies::CREATING_CHART.to_string()));
        match &sent[2] {
            Sent::Photo(chat, bytes, Some(caption)) => {
                assert_eq!(*chat, 99);
                assert!(*bytes > 0);
                assert!(caption.contains(&format!("Expenses Chart - {}", h.current_month())));
                assert!(caption.contains("Total: $20.00"));
            }
            other => panic!("expected photo, got {:?}", other),
        }
    }
}
