use tracing::debug;

use chippy_core::platform::InboundMessage;
use chippy_core::settings::BackoffSettings;
use chippy_core::Message;
use chippy_store::ThreadResolver;

use crate::error::ResolveError;
use crate::platform_thread::PlatformResolver;

/// Where a thread's ancestors come from. Chosen once at startup from
/// `store_locally`.
#[derive(Clone)]
pub enum ThreadStrategy {
    /// Walk parent pointers in the local store. A gap re-walks the chain,
    /// which only costs local reads.
    Stored {
        resolver: ThreadResolver,
        gap_retry: BackoffSettings,
    },
    /// Re-fetch each ancestor from the platform. Gaps are retried per hop
    /// inside the resolver.
    Platform(PlatformResolver),
}

impl ThreadStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ThreadStrategy::Stored { .. } => "stored",
            ThreadStrategy::Platform(_) => "platform",
        }
    }

    /// Rebuild the thread ending at `inbound`, root first.
    pub async fn resolve(&self, inbound: &InboundMessage) -> Result<Vec<Message>, ResolveError> {
        debug!(strategy = self.name(), message_id = %inbound.id, "resolving thread");
        match self {
            ThreadStrategy::Stored { resolver, gap_retry } => {
                let mut attempt = 0;
                loop {
                    match resolver.resolve(inbound.id) {
                        Err(e) if e.is_transient() && attempt + 1 < gap_retry.max_attempts => {
                            let delay = gap_retry.delay_for(attempt);
                            debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "gap in thread, retrying");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        result => return Ok(result?),
                    }
                }
            }
            ThreadStrategy::Platform(resolver) => resolver.resolve(inbound).await,
        }
    }
}
