//! Retries for transient completion failures.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;

use chippy_core::errors::CompletionError;
use chippy_core::provider::CompletionProvider;
use chippy_core::settings::BackoffSettings;
use chippy_core::{BotSettings, ChatMessage};

/// Re-issues a completion after rate limits, overloads, 5xx and network
/// errors. Fatal errors go straight back to the caller.
///
/// Every attempt and wait fits inside `budget`: a retry whose wait would end
/// past it is not made, and the last error is returned instead.
pub struct RetryingProvider<P> {
    inner: P,
    backoff: BackoffSettings,
    budget: Duration,
    retries: AtomicU64,
}

impl<P: CompletionProvider> RetryingProvider<P> {
    pub fn new(inner: P, backoff: BackoffSettings, budget: Duration) -> Self {
        Self {
            inner,
            backoff,
            budget,
            retries: AtomicU64::new(0),
        }
    }

    /// `completion_retry` paced within `completion_timeout_ms`.
    pub fn from_settings(inner: P, settings: &BotSettings) -> Self {
        Self::new(inner, settings.completion_retry.clone(), settings.completion_timeout())
    }

    /// Retries made so far, across all calls.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<P: CompletionProvider> CompletionProvider for RetryingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            let err = match self.inner.complete(messages).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };
            if !err.is_retryable() || attempt + 1 >= self.backoff.max_attempts {
                return Err(err);
            }

            let delay = err
                .suggested_delay()
                .unwrap_or_else(|| self.backoff.delay_for(attempt));
            if started.elapsed() + delay >= self.budget {
                warn!(
                    delay_ms = delay.as_millis() as u64,
                    error_kind = err.error_kind(),
                    "no time left to retry completion"
                );
                return Err(err);
            }

            self.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error_kind = err.error_kind(),
                "retrying completion"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
