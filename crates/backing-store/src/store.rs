use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Record, Result, StreamId};

/// Identifies one live subscription so it can be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    /// Creates a new random handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A change notification as delivered by the transport, before normalization.
///
/// Transports differ: some hand over raw notification text, others an
/// already-decoded JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    Text(String),
    Json(serde_json::Value),
}

impl TransportMessage {
    /// Wraps a JSON document.
    pub fn json(value: serde_json::Value) -> Self {
        TransportMessage::Json(value)
    }

    /// Wraps raw notification text.
    pub fn text(payload: impl Into<String>) -> Self {
        TransportMessage::Text(payload.into())
    }
}

/// A stream of transport messages for one subscription epoch.
///
/// The epoch ends when the stream ends or yields an error.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<TransportMessage>> + Send>>;

/// A live subscription to one stream's change feed.
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub stream: StreamId,
    pub opened_at: DateTime<Utc>,
    pub messages: MessageStream,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("stream", &self.stream)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

/// What the dashboard needs from the store that owns the four streams.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Reads every current record of a stream.
    ///
    /// Records are returned newest first (identity key descending). An empty
    /// stream is an empty vector, not an error.
    async fn read(&self, stream: StreamId) -> Result<Vec<Record>>;

    /// Opens a change-feed subscription for a stream.
    ///
    /// Delivery is at-least-once and ordered within the returned epoch only.
    async fn subscribe(&self, stream: StreamId) -> Result<Subscription>;

    /// Releases a subscription.
    ///
    /// Synchronous and idempotent: releasing an unknown or already released
    /// handle does nothing.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Sorts rows newest first and checks that every row belongs to `stream`.
pub fn order_newest_first(stream: StreamId, mut records: Vec<Record>) -> Result<Vec<Record>> {
    if let Some(stray) = records.iter().find(|r| r.stream() != stream) {
        return Err(crate::TransportError::MalformedResponse {
            stream,
            reason: format!("row {} is tagged {}", stray.id(), stray.stream()),
        });
    }
    records.sort_by(|a, b| b.id().cmp(&a.id()));
    Ok(records)
}
