//! Line-oriented chat platform over stdin/stdout.
//!
//! Inbound events are JSON objects, one per line. Each reply is written as
//! one JSON line and, when a feedback channel is attached, delivered back to
//! the bot as an inbound event authored by the bot, the way a real gateway
//! echoes the bot's own posts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use chippy_core::errors::PlatformError;
use chippy_core::platform::{Author, ChatPlatform, InboundMessage};
use chippy_core::{Attachment, MessageId};

/// Reply as written to the console.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbound {
    pub id: MessageId,
    pub reply_to: MessageId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<OutboundAttachment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundAttachment {
    pub filename: String,
    pub mime_type: String,
    pub size: usize,
}

impl From<&Attachment> for OutboundAttachment {
    fn from(a: &Attachment) -> Self {
        Self {
            filename: a.filename.clone(),
            mime_type: a.mime_type.clone(),
            size: a.data.len(),
        }
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_event(line: &str) -> Result<Option<InboundMessage>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

pub struct ConsolePlatform {
    bot: Author,
    history: parking_lot::Mutex<HashMap<MessageId, InboundMessage>>,
    next_id: AtomicI64,
    outbound: mpsc::UnboundedSender<Outbound>,
    feedback: Option<mpsc::UnboundedSender<InboundMessage>>,
}

impl ConsolePlatform {
    pub fn new(bot: Author, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            bot,
            history: parking_lot::Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            outbound,
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: mpsc::UnboundedSender<InboundMessage>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Remember a delivered event so it can be fetched later. Reply ids are
    /// always allocated above every id seen so far.
    pub fn record(&self, msg: &InboundMessage) {
        self.next_id.fetch_max(msg.id.get().saturating_add(1), Ordering::SeqCst);
        self.history.lock().insert(msg.id, msg.clone());
    }

    fn post(&self, to: &InboundMessage, content: &str, attachment: Option<&Attachment>) -> Result<(), PlatformError> {
        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let out = Outbound {
            id,
            reply_to: to.id,
            content: content.to_string(),
            attachment: attachment.map(OutboundAttachment::from),
        };
        self.outbound
            .send(out)
            .map_err(|_| PlatformError::ReplyFailed("console output closed".into()))?;

        let echo = InboundMessage {
            id,
            reference: Some(to.id),
            author: self.bot.clone(),
            content: content.to_string(),
            mentions: Vec::new(),
        };
        self.record(&echo);
        if let Some(feedback) = &self.feedback {
            if feedback.send(echo).is_err() {
                warn!(message_id = %id, "event loop gone, reply not echoed");
            }
        }
        debug!(message_id = %id, reply_to = %to.id, "reply posted");
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for ConsolePlatform {
    fn bot_identity(&self) -> &Author {
        &self.bot
    }

    async fn reply(&self, to: &InboundMessage, content: &str) -> Result<(), PlatformError> {
        self.post(to, content, None)
    }

    async fn reply_with_attachment(
        &self,
        to: &InboundMessage,
        content: &str,
        attachment: Attachment,
    ) -> Result<(), PlatformError> {
        self.post(to, content, Some(&attachment))
    }

    async fn fetch_message(&self, id: MessageId) -> Result<InboundMessage, PlatformError> {
        self.history
            .lock()
            .get(&id)
            .cloned()
            .ok_or(PlatformError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chippy_core::UserId;

    fn event(id: i64, reference: Option<i64>) -> InboundMessage {
        InboundMessage {
            id: MessageId::new(id),
            reference: reference.map(MessageId::new),
            author: Author::new(42u64, "ana"),
            content: "hi".into(),
            mentions: vec![UserId::new(1)],
        }
    }

    #[test]
    fn parses_event_lines() {
        assert!(parse_event("   ").unwrap().is_none());
        let msg = parse_event(r#"{"id": 3, "reference": 2, "author": {"id": 42, "name": "ana"}, "content": "yo"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(msg.reference, Some(MessageId::new(2)));
        assert!(parse_event("{not json").is_err());
    }

    #[tokio::test]
    async fn reply_is_written_and_echoed() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (fb_tx, mut fb_rx) = mpsc::unbounded_channel();
        let platform = ConsolePlatform::new(Author::new(1u64, "Chippy"), out_tx).with_feedback(fb_tx);

        let question = event(10, None);
        platform.record(&question);
        platform.reply(&question, "hello back").await.unwrap();

        let out = out_rx.recv().await.unwrap();
        assert_eq!(out.id, MessageId::new(11));
        assert_eq!(out.reply_to, MessageId::new(10));
        assert!(out.attachment.is_none());

        let echo = fb_rx.recv().await.unwrap();
        assert_eq!(echo.author.id, UserId::new(1));
        assert_eq!(echo.reference, Some(MessageId::new(10)));
        assert_eq!(platform.fetch_message(MessageId::new(11)).await.unwrap().content, "hello back");
    }

    #[tokio::test]
    async fn every_reply_is_echoed_while_loop_is_busy() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (fb_tx, mut fb_rx) = mpsc::unbounded_channel();
        let platform = ConsolePlatform::new(Author::new(1u64, "Chippy"), out_tx).with_feedback(fb_tx);

        let question = event(10, None);
        platform.record(&question);
        for n in 0..64 {
            platform.reply(&question, &format!("reply {n}")).await.unwrap();
        }
        drop(platform);

        let mut echoed = Vec::new();
        while let Some(echo) = fb_rx.recv().await {
            echoed.push(echo.content);
        }
        assert_eq!(echoed.len(), 64);
        assert_eq!(echoed[63], "reply 63");
    }

    #[tokio::test]
    async fn attachment_metadata_is_reported() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let platform = ConsolePlatform::new(Author::new(1u64, "Chippy"), out_tx);
        platform
            .reply_with_attachment(&event(1, None), "a cat", Attachment::png("a_cat.png", vec![1, 2, 3]))
            .await
            .unwrap();
        let out = out_rx.recv().await.unwrap();
        let attachment = out.attachment.unwrap();
        assert_eq!(attachment.filename, "a_cat.png");
        assert_eq!(attachment.size, 3);
    }

    #[tokio::test]
    async fn unknown_message_is_not_found() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let platform = ConsolePlatform::new(Author::new(1u64, "Chippy"), out_tx);
        let err = platform.fetch_message(MessageId::new(5)).await.unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
    }

    #[tokio::test]
    async fn closed_output_fails_reply() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        drop(out_rx);
        let platform = ConsolePlatform::new(Author::new(1u64, "Chippy"), out_tx);
        let err = platform.reply(&event(1, None), "x").await.unwrap_err();
        assert!(matches!(err, PlatformError::ReplyFailed(_)));
    }
}
