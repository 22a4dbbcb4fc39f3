//! Bot configuration.
//!
//! Values are static for the lifetime of the process and handed to the
//! core at construction time. See [`crate::loader`] for how they are layered.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::provider::ImageSize;

/// Whether a thread without a system root is seeded or skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// Prepend the default context when the thread's root is not `system`.
    PrependDefault,
    /// Only answer threads that are already anchored by a `system` message.
    RequireSystemRoot,
}

/// Exponential backoff parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl BackoffSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Display name of the bot account. Informational only; identity checks
    /// use the platform's user id.
    pub bot_name: String,
    pub chat_model: String,
    /// Prefix that marks a message as setting the conversation context.
    pub context_marker: String,
    /// Content of the sentinel row and of synthetic system messages.
    pub default_context: String,
    /// Resolve threads from the local store instead of re-fetching them.
    pub store_locally: bool,
    pub database_path: PathBuf,
    /// Overrides the strategy's default context policy.
    pub context_policy: Option<ContextPolicy>,
    pub allow_images: bool,
    pub image_prompt: String,
    pub image_size: ImageSize,
    pub image_model: String,
    pub api_base_url: String,
    pub completion_timeout_ms: u64,
    /// Retries of transient completion failures, all within
    /// `completion_timeout_ms`.
    pub completion_retry: BackoffSettings,
    /// Retries when a parent is not persisted yet.
    pub gap_retry: BackoffSettings,
    /// Spacing between platform fetches in the re-fetch strategy.
    pub platform_backoff: BackoffSettings,
    pub max_thread_depth: usize,
    pub debug: bool,
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            bot_name: "Chippy".into(),
            chat_model: "gpt-3.5-turbo".into(),
            context_marker: "you are".into(),
            default_context: "you are a helpful assistant.".into(),
            store_locally: true,
            database_path: default_database_path(),
            context_policy: None,
            allow_images: false,
            image_prompt: "image of".into(),
            image_size: ImageSize::Large,
            image_model: "dall-e-2".into(),
            api_base_url: "https://api.openai.com/v1".into(),
            completion_timeout_ms: 60_000,
            completion_retry: BackoffSettings {
                max_attempts: 3,
                base_delay_ms: 500,
                max_delay_ms: 8_000,
            },
            gap_retry: BackoffSettings::default(),
            platform_backoff: BackoffSettings {
                max_attempts: 5,
                base_delay_ms: 10,
                max_delay_ms: 2_000,
            },
            max_thread_depth: 1_000,
            debug: false,
            api_key: None,
        }
    }
}

impl BotSettings {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    /// Policy in effect: the configured one, or the strategy default
    /// (stored threads must be system-rooted, re-fetched threads are seeded).
    pub fn effective_context_policy(&self) -> ContextPolicy {
        self.context_policy.unwrap_or(if self.store_locally {
            ContextPolicy::RequireSystemRoot
        } else {
            ContextPolicy::PrependDefault
        })
    }

    pub fn validate(&self) -> Result<(), crate::loader::SettingsError> {
        use crate::loader::SettingsError::InvalidValue;

        if self.context_marker.trim().is_empty() {
            return Err(InvalidValue("context_marker must not be empty".into()));
        }
        if self.default_context.trim().is_empty() {
            return Err(InvalidValue("default_context must not be empty".into()));
        }
        if self.completion_timeout_ms == 0 {
            return Err(InvalidValue("completion_timeout_ms must be positive".into()));
        }
        if self.max_thread_depth == 0 {
            return Err(InvalidValue("max_thread_depth must be positive".into()));
        }
        if self.allow_images && self.image_prompt.trim().is_empty() {
            return Err(InvalidValue("image_prompt must not be empty when images are allowed".into()));
        }
        Ok(())
    }
}

fn default_database_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".chippy")
        .join("CHIPPY.db")
}
