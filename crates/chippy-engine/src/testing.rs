//! In-process chat platform for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use chippy_core::errors::PlatformError;
use chippy_core::platform::{Author, ChatPlatform, InboundMessage};
use chippy_core::{Attachment, MessageId};

pub const BOT_ID: u64 = 1;

pub fn bot() -> Author {
    Author::new(BOT_ID, "Chippy")
}

pub fn user() -> Author {
    Author::new(42u64, "ana")
}

pub fn inbound(id: i64, reference: Option<i64>, author: Author, content: &str) -> InboundMessage {
    InboundMessage {
        id: MessageId::new(id),
        reference: reference.map(MessageId::new),
        author,
        content: content.to_string(),
        mentions: Vec::new(),
    }
}

/// Same message with the bot mentioned and a mention token in front.
pub fn mentioning(mut msg: InboundMessage) -> InboundMessage {
    msg.mentions.push(bot().id);
    msg.content = format!("<@{BOT_ID}> {}", msg.content);
    msg
}

#[derive(Clone, Debug, PartialEq)]
pub struct SentReply {
    pub to: MessageId,
    pub content: String,
    pub attachment: Option<Attachment>,
}

/// Records replies and serves `fetch_message` from an in-memory history.
pub struct RecordingPlatform {
    bot: Author,
    history: Mutex<HashMap<MessageId, InboundMessage>>,
    fetch_failures: Mutex<VecDeque<PlatformError>>,
    fetches: AtomicUsize,
    replies: Mutex<Vec<SentReply>>,
    fail_replies: AtomicBool,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self {
            bot: bot(),
            history: Mutex::new(HashMap::new()),
            fetch_failures: Mutex::new(VecDeque::new()),
            fetches: AtomicUsize::new(0),
            replies: Mutex::new(Vec::new()),
            fail_replies: AtomicBool::new(false),
        }
    }

    pub fn remember(&self, msg: InboundMessage) {
        self.history.lock().insert(msg.id, msg);
    }

    /// Errors returned by the next fetches, before history is consulted.
    pub fn fail_fetches(&self, errors: Vec<PlatformError>) {
        self.fetch_failures.lock().extend(errors);
    }

    pub fn fail_replies(&self) {
        self.fail_replies.store(true, Ordering::Relaxed);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn replies(&self) -> Vec<SentReply> {
        self.replies.lock().clone()
    }

    fn record(&self, to: &InboundMessage, content: &str, attachment: Option<Attachment>) -> Result<(), PlatformError> {
        if self.fail_replies.load(Ordering::Relaxed) {
            return Err(PlatformError::ReplyFailed("forbidden".into()));
        }
        self.replies.lock().push(SentReply {
            to: to.id,
            content: content.to_string(),
            attachment,
        });
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    fn bot_identity(&self) -> &Author {
        &self.bot
    }

    async fn reply(&self, to: &InboundMessage, content: &str) -> Result<(), PlatformError> {
        self.record(to, content, None)
    }

    async fn reply_with_attachment(
        &self,
        to: &InboundMessage,
        content: &str,
        attachment: Attachment,
    ) -> Result<(), PlatformError> {
        self.record(to, content, Some(attachment))
    }

    async fn fetch_message(&self, id: MessageId) -> Result<InboundMessage, PlatformError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.fetch_failures.lock().pop_front() {
            return Err(err);
        }
        self.history
            .lock()
            .get(&id)
            .cloned()
            .ok_or(PlatformError::NotFound(id))
    }
}
