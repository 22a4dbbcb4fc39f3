use tracing::trace;

use crate::messages::Role;
use crate::platform::Author;

/// Decides the role tag of a message. Every path that assigns a role goes
/// through here, so the stored thread and a re-fetched thread agree.
///
/// Priority, first match wins:
/// 1. content starts with the context marker (case-insensitive) → `system`
/// 2. the author is the connected bot account → `assistant`
/// 3. anything else → `user`
///
/// Bot identity is decided by user-id equality, never by display name.
#[derive(Clone, Debug)]
pub struct RoleClassifier {
    context_marker: String,
}

impl RoleClassifier {
    pub fn new(context_marker: impl Into<String>) -> Self {
        Self {
            context_marker: context_marker.into().to_lowercase(),
        }
    }

    pub fn context_marker(&self) -> &str {
        &self.context_marker
    }

    /// Whether `content` opens with the context marker.
    pub fn is_context(&self, content: &str) -> bool {
        !self.context_marker.is_empty() && content.to_lowercase().starts_with(&self.context_marker)
    }

    pub fn classify(&self, content: &str, author: &Author, bot: &Author) -> Role {
        let role = if self.is_context(content) {
            Role::System
        } else if author.id == bot.id {
            Role::Assistant
        } else {
            Role::User
        };
        trace!(author_id = %author.id, %role, "classified message");
        role
    }
}
