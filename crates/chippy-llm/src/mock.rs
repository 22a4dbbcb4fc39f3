use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use chippy_core::errors::CompletionError;
use chippy_core::provider::{image_filename, CompletionProvider, ImageGenerator, ImageSize};
use chippy_core::{Attachment, ChatMessage};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Text(String),
    Error(CompletionError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Messages passed to each `complete` call, in call order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(messages.to_vec());

        let Some(response) = self.responses.lock().pop_front() else {
            return Err(CompletionError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<String, CompletionError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Text(text) => return Ok(text),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

/// Image generator that returns a fixed payload.
pub struct MockImageGenerator {
    data: Vec<u8>,
    prompts: Mutex<Vec<String>>,
}

impl MockImageGenerator {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl ImageGenerator for MockImageGenerator {
    async fn generate(&self, prompt: &str, _size: ImageSize) -> Result<Attachment, CompletionError> {
        self.prompts.lock().push(prompt.to_string());
        Ok(Attachment::png(image_filename(prompt), self.data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_responses() {
        let mock = MockProvider::new(vec![MockResponse::text("first"), MockResponse::text("second")]);

        assert_eq!(mock.complete(&[ChatMessage::user("a")]).await.unwrap(), "first");
        assert_eq!(mock.complete(&[ChatMessage::user("b")]).await.unwrap(), "second");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.requests()[1], vec![ChatMessage::user("b")]);
    }

    #[tokio::test]
    async fn exhausted_responses() {
        let mock = MockProvider::new(vec![MockResponse::text("only one")]);
        let _ = mock.complete(&[]).await;
        let result = mock.complete(&[]).await;
        assert!(matches!(result, Err(CompletionError::InvalidRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_error() {
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(5),
            MockResponse::Error(CompletionError::RateLimited { retry_after: None }),
        )]);

        let start = tokio::time::Instant::now();
        let result = mock.complete(&[]).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(matches!(result, Err(CompletionError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn image_mock_records_prompts() {
        let mock = MockImageGenerator::new(vec![1, 2, 3]);
        let a = mock.generate("image of a fox", ImageSize::Small).await.unwrap();
        assert_eq!(a.filename, "image_of_a_fox.png");
        assert_eq!(a.data, vec![1, 2, 3]);
        assert_eq!(mock.prompts(), vec!["image of a fox".to_string()]);
    }
}
