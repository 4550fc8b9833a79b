//! Inbound webhook updates.
//!
//! Telegram's update JSON is read leniently: we only pull out the handful of
//! fields the bot acts on and ignore the rest.

use serde::Deserialize;

#[derive(Deserialize, Debug, Default)]
struct Update {
    message: Option<Message>,
}

#[derive(Deserialize, Debug, Default)]
struct Message {
    chat: Option<Chat>,
    #[serde(default)]
    photo: Option<Vec<PhotoSize>>,
    document: Option<Document>,
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Chat {
    id: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct PhotoSize {
    file_id: String,
}

#[derive(Deserialize, Debug)]
struct Document {
    file_id: String,
    mime_type: Option<String>,
}

/// What the message carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// File id of the largest photo size.
    Photo(String),
    Document { file_id: String, mime_type: Option<String> },
    Text(String),
    /// Stickers, voice notes, locations...
    Unsupported,
}

/// One chat message delivered to the webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub payload: Payload,
}

/// Why an update produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    NotJson,
    NotAMessage,
    NoChatId,
}

impl InboundEvent {
    /// Parse a raw webhook body.
    pub fn from_update(body: &[u8]) -> Result<Self, Skip> {
        let update: Update = serde_json::from_slice(body).map_err(|_| Skip::NotJson)?;
        let message = update.message.ok_or(Skip::NotAMessage)?;
        let chat_id = message
            .chat
            .as_ref()
            .and_then(|c| c.id)
            .filter(|id| *id != 0)
            .ok_or(Skip::NoChatId)?;

        // Telegram lists photo sizes smallest first.
        let payload = if let Some(largest) = message.photo.as_ref().and_then(|sizes| sizes.last()) {
            Payload::Photo(largest.file_id.clone())
        } else if let Some(doc) = message.document {
            Payload::Document {
                file_id: doc.file_id,
                mime_type: doc.mime_type,
            }
        } else if let Some(text) = message.text {
            Payload::Text(text)
        } else {
            Payload::Unsupported
        };

        Ok(Self { chat_id, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_largest_photo_is_chosen() {
        let body = br#"{"update_id": 1, "message": {"message_id": 5, "chat": {"id": 42, "type": "private"},
            "photo": [{"file_id": "small", "width": 90}, {"file_id": "large", "width": 1280}]}}"#;
        let event = InboundEvent::from_update(body).unwrap();
        assert_eq!(event.chat_id, 42);
        assert_eq!(event.payload, Payload::Photo("large".to_string()));
    }

    #[test]
    fn test_photo_wins_over_caption_text() {
        let body = br#"{"message": {"chat": {"id": 7}, "text": "receipt", "photo": [{"file_id": "p"}]}}"#;
        let event = InboundEvent::from_update(body).unwrap();
        assert_eq!(event.payload, Payload::Photo("p".to_string()));
    }

    #[test]
    fn test_document_without_mime_type() {
        let body = br#"{"message": {"chat": {"id": 7}, "document": {"file_id": "d"}}}"#;
        let event = InboundEvent::from_update(body).unwrap();
        assert_eq!(
            event.payload,
            Payload::Document {
                file_id: "d".to_string(),
                mime_type: None
            }
        );
    }

    #[test]
    fn test_skips() {
        assert_eq!(InboundEvent::from_update(b"<html>"), Err(Skip::NotJson));
        assert_eq!(
            InboundEvent::from_update(br#"{"edited_message": {"chat": {"id": 1}}}"#),
            Err(Skip::NotAMessage)
        );
        assert_eq!(
            InboundEvent::from_update(br#"{"message": {"text": "hi"}}"#),
            Err(Skip::NoChatId)
        );
        assert_eq!(
            InboundEvent::from_update(br#"{"message": {"chat": {}, "text": "hi"}}"#),
            Err(Skip::NoChatId)
        );
    }

    #[test]
    fn test_sticker_is_unsupported() {
        let body = br#"{"message": {"chat": {"id": -100}, "sticker": {"file_id": "s"}}}"#;
        let event = InboundEvent::from_update(body).unwrap();
        assert_eq!(event.payload, Payload::Unsupported);
    }
}
