use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CompletionError;
use crate::messages::{Attachment, ChatMessage};

/// Chat-completion backend. `messages` is always chronological and
/// role-tagged, with a system message first.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError>;
}

/// Square output sizes accepted by the image endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ImageSize {
    Small,
    Medium,
    Large,
}

impl ImageSize {
    pub fn pixels(self) -> u32 {
        match self {
            ImageSize::Small => 256,
            ImageSize::Medium => 512,
            ImageSize::Large => 1024,
        }
    }

    /// `"{n}x{n}"` form used by the image API.
    pub fn dimensions(self) -> String {
        let n = self.pixels();
        format!("{n}x{n}")
    }
}

impl TryFrom<u32> for ImageSize {
    type Error = String;

    fn try_from(px: u32) -> Result<Self, Self::Error> {
        match px {
            256 => Ok(ImageSize::Small),
            512 => Ok(ImageSize::Medium),
            1024 => Ok(ImageSize::Large),
            other => Err(format!("unsupported image size {other}; expected 256, 512 or 1024")),
        }
    }
}

impl From<ImageSize> for u32 {
    fn from(size: ImageSize) -> Self {
        size.pixels()
    }
}

/// Image generation backend used for `image of ...` prompts.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<Attachment, CompletionError>;
}

/// Build the attachment filename for an image prompt: lowercased, spaces to
/// underscores, alphanumerics and `_` only, at most 100 characters.
pub fn image_filename(prompt: &str) -> String {
    let stem: String = prompt
        .to_lowercase()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .take(100)
        .collect();
    format!("{stem}.png")
}
