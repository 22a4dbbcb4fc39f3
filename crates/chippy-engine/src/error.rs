use chippy_core::errors::{CompletionError, PlatformError};
use chippy_store::{StoreError, ThreadError};

/// Why a thread could not be rebuilt.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Thread(#[from] ThreadError),

    #[error("platform fetch failed: {0}")]
    Platform(#[from] PlatformError),
}

impl ResolveError {
    /// Worth retrying shortly (a parent that has not landed yet).
    pub fn is_transient(&self) -> bool {
        match self {
            ResolveError::Thread(t) => t.is_transient(),
            ResolveError::Platform(_) => false,
        }
    }
}

/// Failure of one event's pipeline. Never shown to chat users.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("thread resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("reply failed: {0}")]
    Reply(#[source] PlatformError),
}

impl PipelineError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            PipelineError::Storage(e) if e.is_unavailable() => "storage_unavailable",
            PipelineError::Storage(_) => "storage",
            PipelineError::Resolve(ResolveError::Thread(ThreadError::Cycle { .. })) => "cycle",
            PipelineError::Resolve(ResolveError::Thread(ThreadError::TooDeep { .. })) => "too_deep",
            PipelineError::Resolve(ResolveError::Thread(ThreadError::Gap { .. })) => "gap",
            PipelineError::Resolve(ResolveError::Thread(ThreadError::NotFound(_))) => "not_found",
            PipelineError::Resolve(ResolveError::Thread(ThreadError::Storage(e))) if e.is_unavailable() => {
                "storage_unavailable"
            }
            PipelineError::Resolve(ResolveError::Thread(ThreadError::Storage(_))) => "storage",
            PipelineError::Resolve(ResolveError::Platform(_)) => "platform_fetch",
            PipelineError::Completion(_) => "completion",
            PipelineError::Reply(_) => "reply_failure",
        }
    }
}
