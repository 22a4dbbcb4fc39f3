//! Thread reconstruction by re-fetching ancestors from the chat platform.
//!
//! Used when local storage is disabled. Every hop is a platform request,
//! so retries back off exponentially and honor the platform's
//! `retry_after` hint. A parent that is not there yet is re-requested on
//! its own; hops already fetched are never fetched again.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use chippy_core::errors::PlatformError;
use chippy_core::platform::{ChatPlatform, InboundMessage};
use chippy_core::settings::BackoffSettings;
use chippy_core::{Message, MessageId, RoleClassifier};
use chippy_store::thread::DEFAULT_MAX_DEPTH;
use chippy_store::ThreadError;

use crate::error::ResolveError;

#[derive(Clone)]
pub struct PlatformResolver {
    platform: Arc<dyn ChatPlatform>,
    classifier: RoleClassifier,
    backoff: BackoffSettings,
    gap_retry: BackoffSettings,
    max_depth: usize,
}

impl PlatformResolver {
    pub fn new(platform: Arc<dyn ChatPlatform>, classifier: RoleClassifier, backoff: BackoffSettings) -> Self {
        Self {
            platform,
            classifier,
            backoff,
            gap_retry: BackoffSettings::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Pacing for re-requesting a parent the platform does not have yet.
    pub fn with_gap_retry(mut self, gap_retry: BackoffSettings) -> Self {
        self.gap_retry = gap_retry;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Convert a platform message into the stored message shape, with the
    /// mention stripped and the role decided by the shared classifier.
    pub fn to_message(&self, inbound: &InboundMessage) -> Message {
        let prompt = inbound.prompt();
        let role = self
            .classifier
            .classify(prompt, &inbound.author, self.platform.bot_identity());
        Message::new(inbound.id, inbound.reference, role, prompt)
    }

    /// Resolve the thread ending at `start`, root first.
    #[instrument(skip(self, start), fields(message_id = %start.id))]
    pub async fn resolve(&self, start: &InboundMessage) -> Result<Vec<Message>, ResolveError> {
        let mut chain = vec![self.to_message(start)];
        let mut visited = HashSet::from([start.id]);
        let mut child = start.id;
        let mut next = start.reference;

        while let Some(parent_id) = next {
            if !visited.insert(parent_id) {
                warn!(at = %parent_id, "cycle in platform reply chain");
                return Err(ThreadError::Cycle { at: parent_id }.into());
            }
            if chain.len() >= self.max_depth {
                return Err(ThreadError::TooDeep { limit: self.max_depth }.into());
            }

            let parent = self.fetch_parent(child, parent_id).await?;
            chain.push(self.to_message(&parent));
            child = parent_id;
            next = parent.reference;
        }

        chain.reverse();
        debug!(len = chain.len(), "thread re-fetched from platform");
        Ok(chain)
    }

    /// Fetch one ancestor, waiting out a parent that has not shown up yet.
    async fn fetch_parent(&self, child: MessageId, id: MessageId) -> Result<InboundMessage, ResolveError> {
        let mut attempt = 0;
        loop {
            match self.fetch(id).await {
                Ok(parent) => return Ok(parent),
                Err(PlatformError::NotFound(_)) if attempt + 1 < self.gap_retry.max_attempts => {
                    let delay = self.gap_retry.delay_for(attempt);
                    debug!(missing = %id, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "parent not on platform yet, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(PlatformError::NotFound(_)) => return Err(ThreadError::Gap { child, missing: id }.into()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Fetch one message, retrying rate limits and network errors.
    async fn fetch(&self, id: MessageId) -> Result<InboundMessage, PlatformError> {
        let mut attempt = 0;
        loop {
            match self.platform.fetch_message(id).await {
                Ok(message) => return Ok(message),
                Err(e) if e.is_retryable() && attempt + 1 < self.backoff.max_attempts => {
                    let delay = e
                        .suggested_delay()
                        .unwrap_or_else(|| self.backoff.delay_for(attempt));
                    warn!(
                        message_id = %id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "platform fetch failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
