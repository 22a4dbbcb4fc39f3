//! Chat-platform surface consumed by the bot.
//!
//! The gateway client itself lives outside this workspace; the core only
//! needs the inbound event shape and the handful of calls below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;
use crate::ids::{MessageId, UserId};
use crate::messages::Attachment;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub name: String,
}

impl Author {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One message event as delivered by the platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    #[serde(default)]
    pub reference: Option<MessageId>,
    pub author: Author,
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<UserId>,
}

impl InboundMessage {
    pub fn mentions_user(&self, id: UserId) -> bool {
        self.mentions.contains(&id)
    }

    /// Content with a leading mention token removed.
    pub fn prompt(&self) -> &str {
        extract_prompt(&self.content)
    }
}

/// Strip a leading `<@...>` mention from message content.
///
/// Content that does not open with `<` (after whitespace) is returned
/// unchanged.
pub fn extract_prompt(content: &str) -> &str {
    if content.trim_start().starts_with('<') {
        if let Some(end) = content.find('>') {
            return content[end + 1..].trim();
        }
    }
    content
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Identity of the connected bot account.
    fn bot_identity(&self) -> &Author;

    async fn reply(&self, to: &InboundMessage, content: &str) -> Result<(), PlatformError>;

    async fn reply_with_attachment(
        &self,
        to: &InboundMessage,
        content: &str,
        attachment: Attachment,
    ) -> Result<(), PlatformError>;

    /// Fetch a single message from the platform. Rate-limited upstream;
    /// only the platform thread strategy calls this.
    async fn fetch_message(&self, id: MessageId) -> Result<InboundMessage, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_mention() {
        assert_eq!(extract_prompt("<@123> you are a pirate"), "you are a pirate");
        assert_eq!(extract_prompt("  <@!42>   hello  "), "hello");
    }

    #[test]
    fn keeps_plain_content() {
        assert_eq!(extract_prompt("hello <@1>"), "hello <@1>");
        assert_eq!(extract_prompt("no mention"), "no mention");
        assert_eq!(extract_prompt("<unterminated"), "<unterminated");
    }

    #[test]
    fn inbound_event_deserializes_with_defaults() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"id": 5, "author": {"id": 9, "name": "ana"}, "content": "<@1> hi"}"#,
        )
        .unwrap();
        assert_eq!(msg.reference, None);
        assert!(msg.mentions.is_empty());
        assert_eq!(msg.prompt(), "hi");
        assert!(!msg.mentions_user(UserId::new(1)));
    }
}
