//! Live change feed for one stream.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use backing_store::{BackingStore, MessageStream, SubscriptionHandle, TransportError, TransportMessage};
use common::{ChangeEvent, Operation, Record, RecordId, StreamId};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::backoff::RetryPolicy;
use crate::error::MalformedEventError;

const OPERATION_KEYS: [&str; 3] = ["type", "eventType", "op"];
const NEW_IMAGE_KEYS: [&str; 2] = ["record", "new"];
const OLD_IMAGE_KEYS: [&str; 2] = ["old_record", "old"];

/// What the feed hands to the synchronizer's queue.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    /// A new subscription epoch began.
    EpochStarted(u64),
    /// A normalized change.
    Event(ChangeEvent),
}

/// Holds the handle of the subscription currently in use.
///
/// Shared between the feed task and its owner so teardown can release the
/// subscription without waiting for the task.
#[derive(Clone, Default)]
pub struct SubscriptionSlot(Arc<Mutex<Option<SubscriptionHandle>>>);

impl SubscriptionSlot {
    pub fn current(&self) -> Option<SubscriptionHandle> {
        *self.lock()
    }

    fn set(&self, handle: SubscriptionHandle) {
        *self.lock() = Some(handle);
    }

    /// Unsubscribes the held handle, if any. Returns whether one was held.
    pub fn release(&self, store: &dyn BackingStore) -> bool {
        let handle = self.lock().take();
        match handle {
            Some(handle) => {
                store.unsubscribe(handle);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<SubscriptionHandle>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum EpochEnd {
    Shutdown,
    SinkClosed,
    Lost { reason: String, delivered: u64 },
}

/// Whether a lost epoch was healthy enough to restart the backoff schedule.
///
/// Connections that drop before delivering anything keep backing off.
fn epoch_was_stable(policy: &RetryPolicy, delivered: u64, uptime: Duration) -> bool {
    delivered > 0 || uptime >= policy.max_delay()
}

/// Subscribes to one stream and forwards normalized changes in emission order.
///
/// Every (re)connection is a fresh epoch with a full resubscription. Lost
/// connections are retried with backoff until shutdown.
pub struct ChangeFeedClient {
    stream: StreamId,
    store: Arc<dyn BackingStore>,
    policy: RetryPolicy,
    slot: SubscriptionSlot,
}

impl ChangeFeedClient {
    pub fn new(stream: StreamId, store: Arc<dyn BackingStore>, policy: RetryPolicy) -> Self {
        Self {
            stream,
            store,
            policy,
            slot: SubscriptionSlot::default(),
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// The slot holding this client's live subscription handle.
    pub fn slot(&self) -> SubscriptionSlot {
        self.slot.clone()
    }

    /// Turns a transport message into a change event for `stream`.
    ///
    /// Accepts JSON text or values. The operation is read from `type`,
    /// `eventType` or `op`; the post-image from `record` or `new`; the
    /// pre-image from `old_record` or `old`. `table` must name `stream`.
    pub fn normalize(
        stream: StreamId,
        message: &TransportMessage,
    ) -> Result<ChangeEvent, MalformedEventError> {
        let body = match message {
            TransportMessage::Text(text) => serde_json::from_str::<Value>(text)
                .map_err(|e| MalformedEventError::new(stream, format!("invalid JSON: {e}")))?,
            TransportMessage::Json(value) => value.clone(),
        };
        let Value::Object(mut body) = body else {
            return Err(MalformedEventError::new(stream, "message is not an object"));
        };

        let table = body
            .get("table")
            .and_then(Value::as_str)
            .ok_or_else(|| MalformedEventError::new(stream, "missing stream tag"))?;
        let tagged: StreamId = table
            .parse()
            .map_err(|e: common::ParseStreamIdError| MalformedEventError::new(stream, e.to_string()))?;
        if tagged != stream {
            return Err(MalformedEventError::new(
                stream,
                format!("event tagged for {tagged}"),
            ));
        }

        let operation: Operation = OPERATION_KEYS
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .ok_or_else(|| MalformedEventError::new(stream, "missing operation"))?
            .parse()
            .map_err(|e: common::ParseOperationError| {
                MalformedEventError::new(stream, e.to_string())
            })?;

        match operation {
            Operation::Insert | Operation::Update => {
                let row = take_image(&mut body, &NEW_IMAGE_KEYS)
                    .ok_or_else(|| MalformedEventError::new(stream, "missing record"))?;
                let record = Record::from_fields(stream, row)
                    .map_err(|e| MalformedEventError::new(stream, e.to_string()))?;
                Ok(if operation == Operation::Insert {
                    ChangeEvent::Insert(record)
                } else {
                    ChangeEvent::Update(record)
                })
            }
            Operation::Delete => {
                let id = OLD_IMAGE_KEYS
                    .iter()
                    .chain(NEW_IMAGE_KEYS.iter())
                    .find_map(|key| body.get(*key).and_then(|v| v.get("id")).and_then(Value::as_i64))
                    .ok_or_else(|| MalformedEventError::new(stream, "missing identity key"))?;
                Ok(ChangeEvent::Delete {
                    stream,
                    id: RecordId::new(id),
                })
            }
        }
    }

    /// Runs subscription epochs until `shutdown` flips or the sink closes.
    #[tracing::instrument(skip_all, fields(stream = %self.stream))]
    pub async fn run(
        self,
        sink: mpsc::UnboundedSender<FeedSignal>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut attempt: u32 = 0;
        let mut epoch: u64 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let timeout = self.policy.attempt_timeout();
            let subscribe = tokio::time::timeout(timeout, self.store.subscribe(self.stream));
            let outcome = tokio::select! {
                _ = shutdown.changed() => break,
                result = subscribe => result.map_err(|_| TransportError::Timeout(timeout)).and_then(|r| r),
            };

            match outcome {
                Ok(subscription) => {
                    self.slot.set(subscription.handle);
                    if *shutdown.borrow() {
                        break;
                    }
                    epoch += 1;
                    let connected_at = Instant::now();
                    metrics::counter!("sync_feed_epochs_total", "stream" => self.stream.as_str())
                        .increment(1);
                    tracing::info!(epoch, handle = %subscription.handle, "change feed connected");

                    if sink.send(FeedSignal::EpochStarted(epoch)).is_err() {
                        break;
                    }

                    let end = self.drain(subscription.messages, &sink, &mut shutdown).await;
                    self.slot.release(self.store.as_ref());
                    match end {
                        EpochEnd::Shutdown | EpochEnd::SinkClosed => break,
                        EpochEnd::Lost { reason, delivered } => {
                            if epoch_was_stable(&self.policy, delivered, connected_at.elapsed()) {
                                attempt = 0;
                            }
                            tracing::warn!(epoch, delivered, %reason, "change feed lost, resubscribing");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "subscribe failed");
                }
            }

            let delay = self.policy.delay(attempt);
            attempt = attempt.saturating_add(1);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "waiting before resubscribing");
            tokio::select! {
                _ = shutdown.changed() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.slot.release(self.store.as_ref());
        tracing::debug!("change feed stopped");
    }

    async fn drain(
        &self,
        mut messages: MessageStream,
        sink: &mpsc::UnboundedSender<FeedSignal>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> EpochEnd {
        let mut delivered: u64 = 0;
        loop {
            let next = tokio::select! {
                _ = shutdown.changed() => return EpochEnd::Shutdown,
                next = messages.next() => next,
            };

            if matches!(next, Some(Ok(_))) {
                delivered += 1;
            }
            match next {
                None => {
                    return EpochEnd::Lost {
                        reason: "stream ended".to_string(),
                        delivered,
                    };
                }
                Some(Err(e)) => {
                    return EpochEnd::Lost {
                        reason: e.to_string(),
                        delivered,
                    };
                }
                Some(Ok(message)) => match Self::normalize(self.stream, &message) {
                    Ok(event) => {
                        if sink.send(FeedSignal::Event(event)).is_err() {
                            return EpochEnd::SinkClosed;
                        }
                    }
                    Err(e) => {
                        metrics::counter!("sync_malformed_events_total", "stream" => self.stream.as_str())
                            .increment(1);
                        tracing::warn!(error = %e, "dropping malformed change event");
                    }
                },
            }
        }
    }
}

/// Removes the first non-null object image found under `keys`.
fn take_image(body: &mut Map<String, Value>, keys: &[&str]) -> Option<Map<String, Value>> {
    keys.iter().find_map(|key| match body.remove(*key) {
        Some(Value::Object(image)) => Some(image),
        _ => None,
    })
}
