use crate::kv::StoreError;
use thiserror::Error;

/// Errors surfaced by the cache layer.
///
/// Background tasks never propagate these to callers; they log the error
/// and reset the affected subject to `Unknown` so the next query restarts
/// the flow. Interactive calls surface the error with its originating
/// context after the retry envelope is exhausted.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// A durable-store key was absent. The db retry specialization
    /// converts this to `None` before it reaches callers.
    #[error("not found: {0}")]
    NotFound(String),

    /// Indexer or subscription-transport connectivity failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The durable store cannot be shrunk below the configured ceiling.
    #[error("cache size limit exceeded: {0}")]
    LimitExceeded(String),

    /// The caller requested a page past the known end of a cached subject.
    #[error("page {page} out of range: subject has {num_pages} pages")]
    OutOfRange { page: u32, num_pages: u32 },

    /// A loaded view disagrees with its durable header even after repair.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    /// Underlying key-value store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cached record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The owning cache instance has been destroyed.
    #[error("cache has been shut down")]
    Shutdown,
}

impl CacheError {
    /// Returns `true` if the retry envelope should attempt this operation
    /// again. Transport and store failures are transient; everything else
    /// retrying cannot fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Store(_))
    }

    /// Returns `true` if this error represents a missing key rather than
    /// a failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
