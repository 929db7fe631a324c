//! Synchronization error types.

use backing_store::TransportError;
use common::StreamId;
use thiserror::Error;

/// A change notification that cannot be turned into a `ChangeEvent`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed event on stream {stream}: {reason}")]
pub struct MalformedEventError {
    pub stream: StreamId,
    pub reason: String,
}

impl MalformedEventError {
    pub fn new(stream: StreamId, reason: impl Into<String>) -> Self {
        Self {
            stream,
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while synchronizing a stream.
///
/// None of these are fatal: transport errors are retried, malformed events
/// are dropped and lifecycle errors are ignored.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A read or subscribe against the backing store failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A change notification was missing its key, stream tag or operation.
    #[error(transparent)]
    MalformedEvent(#[from] MalformedEventError),

    /// An event reached a synchronizer that is already closed.
    #[error("Synchronizer for stream {stream} is closed")]
    Lifecycle { stream: StreamId },
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
