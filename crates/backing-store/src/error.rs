use std::time::Duration;

use thiserror::Error;

use crate::StreamId;

/// Errors raised by a read or subscribe against the backing store.
///
/// Every variant is retryable from the caller's point of view.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The store could not be reached.
    #[error("Backing store unreachable: {0}")]
    Unreachable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store answered with something that is not a valid row set.
    #[error("Malformed response for stream {stream}: {reason}")]
    MalformedResponse { stream: StreamId, reason: String },

    /// The attempt did not complete in time.
    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The subscription was closed by the store.
    #[error("Subscription for stream {0} closed")]
    Closed(StreamId),
}

/// Result type for backing store operations.
pub type Result<T> = std::result::Result<T, TransportError>;
