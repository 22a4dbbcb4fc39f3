//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BotSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `CHIPPY_*` environment variable overrides (highest priority)
//! 4. Read the API key from `OPENAI_API_KEY`

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::provider::ImageSize;
use crate::settings::{BotSettings, ContextPolicy};

/// Errors that can occur when loading or parsing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Resolve the default settings file (`~/.chippy/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".chippy").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BotSettings> {
    let defaults = serde_json::to_value(BotSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: BotSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced by `source`, and
/// nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides. Unparseable values are ignored.
pub fn apply_env_overrides<F>(settings: &mut BotSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let boolean = |key: &str| string(key).and_then(|v| parse_bool(&v));
    let number = |key: &str| string(key).and_then(|v| v.parse::<u64>().ok());

    if let Some(v) = string("CHIPPY_BOT_NAME") {
        settings.bot_name = v;
    }
    if let Some(v) = string("CHIPPY_CHAT_MODEL") {
        settings.chat_model = v;
    }
    if let Some(v) = string("CHIPPY_CONTEXT_MARKER") {
        settings.context_marker = v;
    }
    if let Some(v) = string("CHIPPY_DEFAULT_CONTEXT") {
        settings.default_context = v;
    }
    if let Some(v) = boolean("CHIPPY_STORE_LOCALLY") {
        settings.store_locally = v;
    }
    if let Some(v) = string("CHIPPY_DB") {
        settings.database_path = PathBuf::from(v);
    }
    if let Some(v) = string("CHIPPY_CONTEXT_POLICY") {
        if let Ok(policy) = serde_json::from_value::<ContextPolicy>(Value::String(v)) {
            settings.context_policy = Some(policy);
        }
    }
    if let Some(v) = boolean("CHIPPY_ALLOW_IMAGES") {
        settings.allow_images = v;
    }
    if let Some(v) = number("CHIPPY_IMAGE_SIZE") {
        if let Ok(size) = u32::try_from(v).map_err(|e| e.to_string()).and_then(ImageSize::try_from) {
            settings.image_size = size;
        }
    }
    if let Some(v) = string("CHIPPY_API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = number("CHIPPY_COMPLETION_TIMEOUT_MS") {
        settings.completion_timeout_ms = v;
    }
    if let Some(v) = number("CHIPPY_COMPLETION_RETRIES").and_then(|v| u32::try_from(v).ok()) {
        settings.completion_retry.max_attempts = v;
    }
    if let Some(v) = boolean("CHIPPY_DEBUG") {
        settings.debug = v;
    }
    if let Some(v) = string("OPENAI_API_KEY") {
        settings.api_key = Some(SecretString::from(v));
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
