use tracing::{debug, info};

use chippy_core::settings::ContextPolicy;
use chippy_core::{BotSettings, ChatMessage, Message, MessageId, Role};
use chippy_store::{MessageRepo, StoreError};

/// Anchors threads with a system message.
#[derive(Clone, Debug)]
pub struct ContextSeeder {
    default_context: String,
    policy: ContextPolicy,
}

impl ContextSeeder {
    pub fn new(default_context: impl Into<String>, policy: ContextPolicy) -> Self {
        Self {
            default_context: default_context.into(),
            policy,
        }
    }

    /// Default context and effective policy from settings. The bot and the
    /// `thread` command both build their seeder here.
    pub fn from_settings(settings: &BotSettings) -> Self {
        Self::new(settings.default_context.clone(), settings.effective_context_policy())
    }

    pub fn policy(&self) -> ContextPolicy {
        self.policy
    }

    pub fn default_context(&self) -> &str {
        &self.default_context
    }

    /// The sentinel row (`id = 0`) carrying the default context.
    pub fn sentinel(&self) -> Message {
        Message::new(MessageId::SENTINEL, None, Role::System, self.default_context.clone())
    }

    /// Write the sentinel. Safe to run on every startup.
    pub fn seed_sentinel(&self, repo: &MessageRepo) -> Result<(), StoreError> {
        repo.put(&self.sentinel())?;
        info!("default context seeded");
        Ok(())
    }

    /// Apply `policy` to a thread. Under `PrependDefault` a thread whose first
    /// message is not `system` gets a synthetic, unstored system message.
    pub fn seed_with(&self, thread: Vec<ChatMessage>, policy: ContextPolicy) -> Vec<ChatMessage> {
        let anchored = thread.first().is_some_and(|m| m.role == Role::System);
        if anchored || policy == ContextPolicy::RequireSystemRoot {
            return thread;
        }
        debug!("prepending default context");
        let mut seeded = Vec::with_capacity(thread.len() + 1);
        seeded.push(ChatMessage::system(self.default_context.clone()));
        seeded.extend(thread);
        seeded
    }

    pub fn seed(&self, thread: Vec<ChatMessage>) -> Vec<ChatMessage> {
        self.seed_with(thread, self.policy)
    }

    /// A thread may go to the completion service only when it opens with a
    /// system message.
    pub fn is_eligible(thread: &[ChatMessage]) -> bool {
        thread.first().is_some_and(|m| m.role == Role::System)
    }

    /// Seed a resolved thread and apply the eligibility gate.
    pub fn prepare(&self, thread: Vec<Message>) -> Option<Vec<ChatMessage>> {
        self.prepare_with(thread, self.policy)
    }

    pub fn prepare_with(&self, thread: Vec<Message>, policy: ContextPolicy) -> Option<Vec<ChatMessage>> {
        let chat: Vec<ChatMessage> = thread.into_iter().map(ChatMessage::from).collect();
        let seeded = self.seed_with(chat, policy);
        Self::is_eligible(&seeded).then_some(seeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chippy_store::Database;

    const CTX: &str = "you are a helpful assistant.";

    fn msg(id: i64, parent: Option<i64>, role: Role, content: &str) -> Message {
        Message::new(MessageId::new(id), parent.map(MessageId::new), role, content)
    }

    #[test]
    fn settings_pick_policy_per_strategy() {
        let mut settings = BotSettings::default();
        assert_eq!(ContextSeeder::from_settings(&settings).policy(), ContextPolicy::RequireSystemRoot);

        settings.store_locally = false;
        let seeder = ContextSeeder::from_settings(&settings);
        assert_eq!(seeder.policy(), ContextPolicy::PrependDefault);
        assert_eq!(seeder.default_context(), CTX);

        settings.context_policy = Some(ContextPolicy::RequireSystemRoot);
        assert_eq!(ContextSeeder::from_settings(&settings).policy(), ContextPolicy::RequireSystemRoot);
    }

    #[test]
    fn sentinel_seeding_is_idempotent() {
        let repo = MessageRepo::new(Database::in_memory().unwrap());
        let seeder = ContextSeeder::new(CTX, ContextPolicy::RequireSystemRoot);
        seeder.seed_sentinel(&repo).unwrap();
        seeder.seed_sentinel(&repo).unwrap();

        assert_eq!(repo.count().unwrap(), 1);
        let sentinel = repo.get(MessageId::SENTINEL).unwrap();
        assert_eq!(sentinel, msg(0, None, Role::System, CTX));
    }

    #[test]
    fn reseeding_picks_up_new_default() {
        let repo = MessageRepo::new(Database::in_memory().unwrap());
        ContextSeeder::new("old", ContextPolicy::PrependDefault).seed_sentinel(&repo).unwrap();
        ContextSeeder::new("new", ContextPolicy::PrependDefault).seed_sentinel(&repo).unwrap();
        assert_eq!(repo.get(MessageId::SENTINEL).unwrap().content, "new");
    }

    #[test]
    fn prepend_policy_anchors_user_rooted_thread() {
        let seeder = ContextSeeder::new(CTX, ContextPolicy::PrependDefault);
        let thread = vec![msg(5, None, Role::User, "hi"), msg(6, Some(5), Role::Assistant, "yo")];

        let prepared = seeder.prepare(thread).unwrap();
        assert_eq!(
            prepared,
            vec![
                ChatMessage::system(CTX),
                ChatMessage::user("hi"),
                ChatMessage::assistant("yo"),
            ]
        );
    }

    #[test]
    fn system_rooted_thread_is_left_alone() {
        let seeder = ContextSeeder::new(CTX, ContextPolicy::PrependDefault);
        let thread = vec![msg(1, None, Role::System, "you are a pirate"), msg(2, Some(1), Role::User, "ahoy")];
        let prepared = seeder.prepare(thread).unwrap();
        assert_eq!(prepared.len(), 2);
        assert_eq!(prepared[0], ChatMessage::system("you are a pirate"));
    }

    #[test]
    fn require_policy_rejects_user_rooted_thread() {
        let seeder = ContextSeeder::new(CTX, ContextPolicy::RequireSystemRoot);
        assert!(seeder.prepare(vec![msg(5, None, Role::User, "hi")]).is_none());
        assert!(seeder.prepare(vec![]).is_none());
    }

    #[test]
    fn prepend_policy_seeds_empty_thread() {
        let seeder = ContextSeeder::new(CTX, ContextPolicy::PrependDefault);
        assert_eq!(seeder.prepare(vec![]).unwrap(), vec![ChatMessage::system(CTX)]);
    }

    #[test]
    fn prepare_with_overrides_policy() {
        let seeder = ContextSeeder::new(CTX, ContextPolicy::RequireSystemRoot);
        let prepared = seeder
            .prepare_with(vec![msg(5, None, Role::User, "hi")], ContextPolicy::PrependDefault)
            .unwrap();
        assert_eq!(prepared[0].role, Role::System);
    }

    #[test]
    fn submitted_threads_always_start_with_system() {
        let roots = [Role::System, Role::User, Role::Assistant];
        for policy in [ContextPolicy::PrependDefault, ContextPolicy::RequireSystemRoot] {
            let seeder = ContextSeeder::new(CTX, policy);
            for role in roots {
                if let Some(prepared) = seeder.prepare(vec![msg(1, None, role, "x")]) {
                    assert_eq!(prepared[0].role, Role::System, "{policy:?} {role:?}");
                }
            }
        }
    }
}
