pub mod classify;
pub mod errors;
pub mod ids;
pub mod loader;
pub mod messages;
pub mod platform;
pub mod provider;
pub mod settings;

pub use classify::RoleClassifier;
pub use ids::{MessageId, UserId};
pub use messages::{Attachment, ChatMessage, Message, Role};
pub use settings::BotSettings;
