//! Gemini client and the receipt extraction built on top of it.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::tracker::expense::{ExpenseRecord, Extraction};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// A single-shot text generation call. The image, when present, is JPEG.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Returns the concatenated text of the first candidate, `None` when the
    /// response carried no text at all.
    async fn generate(&self, prompt: &str, image_jpeg: Option<&[u8]>) -> Result<Option<String>, String>;
}

pub struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: &'static str,
    data: String,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, prompt: &str, image_jpeg: Option<&[u8]>) -> Result<Option<String>, String> {
        let mut parts = vec![Part::Text {
            text: prompt.to_string(),
        }];
        if let Some(bytes) = image_jpeg {
            parts.push(Part::Image {
                inline_data: InlineData {
                    mime_type: "image/jpeg",
                    data: base64::engine::general_purpose::STANDARD.encode(bytes),
                },
            });
        }

        let request = GenerateRequest {
            contents: vec![Content { parts }],
        };

        let url = format!("{}/{}:generateContent", GEMINI_API_BASE, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response: {e}"))?;

        debug!("Gemini response status: {status}");

        if !status.is_success() {
            return Err(format!("API error {status}: {body}"));
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| format!("Failed to parse response: {e}"))?;

        if let Some(error) = parsed.error {
            return Err(format!("Gemini error: {}", error.message));
        }

        let text: String = parsed
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(text))
    }
}

/// What the user sent us.
#[derive(Debug, Clone, Copy)]
pub enum ExtractionInput<'a> {
    Text(&'a str),
    /// Normalized JPEG bytes.
    Image(&'a [u8]),
}

/// Turns receipts and free text into expense records.
pub struct ExpenseExtractor {
    model: Option<Arc<dyn GenerativeModel>>,
    timezone: Tz,
}

impl ExpenseExtractor {
    pub fn new(model: Option<Arc<dyn GenerativeModel>>, timezone: Tz) -> Self {
        Self { model, timezone }
    }

    /// Today in the bot's time zone.
    pub fn today(&self) -> NaiveDate {
        chrono::Utc::now().with_timezone(&self.timezone).date_naive()
    }

    pub async fn extract(&self, input: ExtractionInput<'_>) -> Extraction {
        let Some(model) = self.model.as_ref() else {
            return Extraction::Failed("AI service not available".to_string());
        };

        let prompt = build_prompt(self.today());

        let result = match input {
            ExtractionInput::Image(bytes) => {
                info!("🧾 Extracting expense from image ({} bytes)", bytes.len());
                model.generate(&prompt, Some(bytes)).await
            }
            ExtractionInput::Text(text) => {
                info!("🧾 Extracting expense from text");
                model.generate(&format!("{prompt}\n\nText: {text}"), None).await
            }
        };

        match result {
            Ok(Some(reply)) => parse_reply(&reply),
            Ok(None) => {
                error!("Empty response from Gemini API");
                Extraction::Failed("No response from AI".to_string())
            }
            Err(e) => {
                error!("Error processing with Gemini: {e}");
                Extraction::Failed(format!("Processing failed: {e}"))
            }
        }
    }
}

/// The instruction sent with every extraction.
pub fn build_prompt(today: NaiveDate) -> String {
    let current_date = today.format("%Y-%m-%d");
    format!(
        r#"Analyze this receipt/expense and extract the following information in JSON format:
{{
  "amount": float (just the number),
  "category": "one of: food, transport, utilities, shopping, entertainment, healthcare, other",
  "description": "brief description of the expense",
  "date": "YYYY-MM-DD format, use {current_date} if not clear from the content",
  "merchant": "store/company name if available"
}}

Current date today is: {current_date}

Respond with a single JSON object and nothing else.
If this is not a valid expense or receipt, return: {{"error": "Not a valid expense"}}"#
    )
}

/// Remove a ```` ```json ```` or bare ```` ``` ```` wrapper. Anything else is
/// returned trimmed but otherwise untouched.
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let inner = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        return trimmed;
    };
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Interpret the model's reply.
pub fn parse_reply(reply: &str) -> Extraction {
    let body = strip_code_fence(reply);

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            error!("JSON parsing error: {e}");
            return Extraction::Failed("Failed to parse AI response".to_string());
        }
    };

    let Some(obj) = value.as_object() else {
        error!("Gemini reply is JSON but not an object");
        return Extraction::Failed("Failed to parse AI response".to_string());
    };

    if let Some(err) = obj.get("error") {
        let message = match err {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Extraction::Failed(message);
    }

    Extraction::Expense(ExpenseRecord::from_json(obj))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedModel {
        reply: Result<Option<String>, String>,
        prompts: Mutex<Vec<(String, bool)>>,
    }

    impl CannedModel {
        fn new(reply: Result<Option<String>, String>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerativeModel for CannedModel {
        async fn generate(&self, prompt: &str, image: Option<&[u8]>) -> Result<Option<String>, String> {
            self.prompts.lock().unwrap().push((prompt.to_string(), image.is_some()));
            self.reply.clone()
        }
    }

    fn extractor(model: Arc<CannedModel>) -> ExpenseExtractor {
        ExpenseExtractor::new(Some(model), chrono_tz::Asia::Kuala_Lumpur)
    }

    #[test]
    fn test_fence_forms_parse_identically() {
        let body = r#"{"amount": 15.0, "category": "food", "description": "Lunch", "date": "2026-10-18", "merchant": ""}"#;
        let tagged = format!("```json\n{body}\n```");
        let bare = format!("```\n{body}\n```");

        let a = parse_reply(&tagged);
        let b = parse_reply(&bare);
        assert_eq!(a, b);
        assert_eq!(a, parse_reply(body));
        assert!(matches!(a, Extraction::Expense(_)));
    }

    #[test]
    fn test_other_wrappers_fail_to_parse() {
        let reply = "Here you go: {\"amount\": 3}";
        assert_eq!(
            parse_reply(reply),
            Extraction::Failed("Failed to parse AI response".to_string())
        );
        assert_eq!(
            parse_reply("~~~json\n{\"amount\": 3}\n~~~"),
            Extraction::Failed("Failed to parse AI response".to_string())
        );
    }

    #[test]
    fn test_non_object_json_is_parse_failure() {
        assert_eq!(
            parse_reply("[1, 2, 3]"),
            Extraction::Failed("Failed to parse AI response".to_string())
        );
    }

    #[test]
    fn test_error_field_relayed_verbatim() {
        assert_eq!(
            parse_reply(r#"{"error": "Not a valid expense"}"#),
            Extraction::Failed("Not a valid expense".to_string())
        );
    }

    #[test]
    fn test_prompt_embeds_date_and_categories() {
        let prompt = build_prompt(NaiveDate::from_ymd_opt(2026, 3, 9).unwrap());
        assert!(prompt.contains("use 2026-03-09 if not clear"));
        assert!(prompt.contains("Current date today is: 2026-03-09"));
        for c in crate::tracker::expense::Category::ALL {
            assert!(prompt.contains(c.as_str()), "missing {}", c.as_str());
        }
    }

    #[tokio::test]
    async fn test_no_model_means_unavailable() {
        let extractor = ExpenseExtractor::new(None, chrono_tz::Asia::Kuala_Lumpur);
        assert_eq!(
            extractor.extract(ExtractionInput::Text("Lunch $15")).await,
            Extraction::Failed("AI service not available".to_string())
        );
    }

    #[tokio::test]
    async fn test_empty_reply_is_no_response() {
        let model = CannedModel::new(Ok(None));
        let result = extractor(model).extract(ExtractionInput::Text("Lunch")).await;
        assert_eq!(result, Extraction::Failed("No response from AI".to_string()));
    }

    #[tokio::test]
    async fn test_transport_error_is_processing_failed() {
        let model = CannedModel::new(Err("HTTP error: connection refused".to_string()));
        let result = extractor(model).extract(ExtractionInput::Text("Lunch")).await;
        assert_eq!(
            result,
            Extraction::Failed("Processing failed: HTTP error: connection refused".to_string())
        );
    }

    #[tokio::test]
    async fn test_text_goes_after_prompt_without_image() {
        let model = CannedModel::new(Ok(Some(r#"{"amount": 4.5}"#.to_string())));
        let ex = extractor(model.clone());
        ex.extract(ExtractionInput::Text("Coffee 4.50")).await;

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].0.ends_with("\n\nText: Coffee 4.50"));
        assert!(!prompts[0].1);
    }

    #[tokio::test]
    async fn test_image_is_sent_inline() {
        let model = CannedModel::new(Ok(Some(r#"{"amount": 4.5}"#.to_string())));
        let ex = extractor(model.clone());
        let result = ex.extract(ExtractionInput::Image(&[0xFF, 0xD8, 0xFF])).await;

        assert!(matches!(result, Extraction::Expense(ref r) if r.amount == Some(4.5)));
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].1);
        assert!(!prompts[0].0.contains("Text:"));
    }

    #[test]
    fn test_request_serialization_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: "hi".to_string() },
                    Part::Image {
                        inline_data: InlineData {
                            mime_type: "image/jpeg",
                            data: "AAAA".to_string(),
                        },
                    },
                ],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["contents"][0]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
    }
}
