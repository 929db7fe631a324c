use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};
use tokio::sync::{RwLock, mpsc};

use crate::{
    Record, RecordId, Result, StreamId, TransportError,
    store::{BackingStore, Subscription, SubscriptionHandle, TransportMessage},
};

type MessageSender = mpsc::UnboundedSender<Result<TransportMessage>>;

#[derive(Default)]
struct Table {
    rows: BTreeMap<RecordId, Record>,
    last_id: RecordId,
}

#[derive(Default)]
struct Faults {
    read_failures: HashMap<StreamId, u32>,
    subscribe_failures: HashMap<StreamId, u32>,
    read_delay: Option<Duration>,
}

/// In-memory backing store for tests and local runs.
///
/// Mutations are fanned out to live subscribers using the same notification
/// shape the Postgres trigger emits. Faults can be injected per stream.
#[derive(Clone, Default)]
pub struct InMemoryBackingStore {
    tables: Arc<RwLock<HashMap<StreamId, Table>>>,
    subscribers: Arc<Mutex<HashMap<SubscriptionHandle, (StreamId, MessageSender)>>>,
    faults: Arc<Mutex<Faults>>,
}

impl InMemoryBackingStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads rows without notifying subscribers. Rows must carry an `id`.
    pub async fn seed(&self, stream: StreamId, rows: Vec<Value>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(stream).or_default();
        for row in rows {
            let record =
                Record::from_row(stream, row).map_err(|e| TransportError::MalformedResponse {
                    stream,
                    reason: e.to_string(),
                })?;
            table.last_id = table.last_id.max(record.id());
            table.rows.insert(record.id(), record);
        }
        Ok(())
    }

    /// Inserts a row under the next identity key and notifies subscribers.
    pub async fn insert(&self, stream: StreamId, fields: Value) -> Result<Record> {
        let record = {
            let mut tables = self.tables.write().await;
            let table = tables.entry(stream).or_default();
            let id = table
                .last_id
                .next()
                .ok_or_else(|| TransportError::MalformedResponse {
                    stream,
                    reason: format!("identity keys exhausted after {}", table.last_id),
                })?;
            table.last_id = id;

            let mut fields = into_map(fields);
            fields.insert("id".to_string(), json!(id.as_i64()));
            let record = Record::from_fields(stream, fields).map_err(|e| {
                TransportError::MalformedResponse {
                    stream,
                    reason: e.to_string(),
                }
            })?;
            table.rows.insert(id, record.clone());
            record
        };
        self.broadcast(stream, notification(stream, "INSERT", Some(&record), None));
        Ok(record)
    }

    /// Merges `fields` into an existing row and notifies subscribers.
    ///
    /// Returns `None` when the row does not exist.
    pub async fn update(&self, stream: StreamId, id: RecordId, fields: Value) -> Option<Record> {
        let (old, new) = {
            let mut tables = self.tables.write().await;
            let row = tables.get_mut(&stream)?.rows.get_mut(&id)?;
            let old = row.clone();

            let mut merged = old.fields().clone();
            for (name, value) in into_map(fields) {
                if name != "id" {
                    merged.insert(name, value);
                }
            }
            let new = Record::from_fields(stream, merged).ok()?;
            *row = new.clone();
            (old, new)
        };
        self.broadcast(
            stream,
            notification(stream, "UPDATE", Some(&new), Some(&old)),
        );
        Some(new)
    }

    /// Removes a row and notifies subscribers. Returns whether it existed.
    pub async fn delete(&self, stream: StreamId, id: RecordId) -> bool {
        let removed = {
            let mut tables = self.tables.write().await;
            tables.get_mut(&stream).and_then(|t| t.rows.remove(&id))
        };
        match removed {
            Some(old) => {
                self.broadcast(stream, notification(stream, "DELETE", None, Some(&old)));
                true
            }
            None => false,
        }
    }

    /// Delivers an arbitrary message to every subscriber of `stream`.
    pub fn emit(&self, stream: StreamId, message: TransportMessage) {
        self.broadcast(stream, message);
    }

    /// Drops every live subscription of `stream`, ending their epochs.
    pub fn disconnect(&self, stream: StreamId) {
        self.lock_subscribers().retain(|_, (s, _)| *s != stream);
    }

    /// Makes the next `count` reads of `stream` fail.
    pub fn fail_reads(&self, stream: StreamId, count: u32) {
        self.lock_faults().read_failures.insert(stream, count);
    }

    /// Makes the next `count` subscribe attempts on `stream` fail.
    pub fn fail_subscribes(&self, stream: StreamId, count: u32) {
        self.lock_faults().subscribe_failures.insert(stream, count);
    }

    /// Delays every read by `delay`.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.lock_faults().read_delay = delay;
    }

    /// Returns the number of subscriptions on `stream` whose receiver is alive.
    pub fn active_subscriptions(&self, stream: StreamId) -> usize {
        self.lock_subscribers()
            .values()
            .filter(|(s, tx)| *s == stream && !tx.is_closed())
            .count()
    }

    /// Returns the number of rows in `stream`.
    pub async fn record_count(&self, stream: StreamId) -> usize {
        self.tables
            .read()
            .await
            .get(&stream)
            .map_or(0, |t| t.rows.len())
    }

    fn broadcast(&self, stream: StreamId, message: TransportMessage) {
        self.lock_subscribers().retain(|_, (s, tx)| {
            *s != stream || tx.send(Ok(message.clone())).is_ok()
        });
    }

    fn take_fault(counter: &mut HashMap<StreamId, u32>, stream: StreamId) -> bool {
        match counter.get_mut(&stream) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn lock_subscribers(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<SubscriptionHandle, (StreamId, MessageSender)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BackingStore for InMemoryBackingStore {
    async fn read(&self, stream: StreamId) -> Result<Vec<Record>> {
        let (fail, delay) = {
            let mut faults = self.lock_faults();
            let fail = Self::take_fault(&mut faults.read_failures, stream);
            (fail, faults.read_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(TransportError::Unreachable(format!(
                "injected read failure for {stream}"
            )));
        }

        let tables = self.tables.read().await;
        Ok(tables
            .get(&stream)
            .map(|t| t.rows.values().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn subscribe(&self, stream: StreamId) -> Result<Subscription> {
        if Self::take_fault(&mut self.lock_faults().subscribe_failures, stream) {
            return Err(TransportError::Unreachable(format!(
                "injected subscribe failure for {stream}"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SubscriptionHandle::new();
        self.lock_subscribers().insert(handle, (stream, tx));

        let messages = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });

        Ok(Subscription {
            handle,
            stream,
            opened_at: Utc::now(),
            messages: Box::pin(messages),
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.lock_subscribers().remove(&handle);
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn notification(
    stream: StreamId,
    kind: &str,
    record: Option<&Record>,
    old_record: Option<&Record>,
) -> TransportMessage {
    TransportMessage::json(json!({
        "table": stream.as_str(),
        "type": kind,
        "record": record.map(Record::fields),
        "old_record": old_record.map(Record::fields),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn read_returns_newest_first() {
        let store = InMemoryBackingStore::new();
        store
            .seed(
                StreamId::Attendance,
                vec![json!({"id": 3}), json!({"id": 5}), json!({"id": 4})],
            )
            .await
            .unwrap();

        let rows = store.read(StreamId::Attendance).await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.id().as_i64()).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn read_of_empty_stream_is_empty() {
        let store = InMemoryBackingStore::new();
        assert!(store.read(StreamId::Alerts).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids_after_seed() {
        let store = InMemoryBackingStore::new();
        store
            .seed(StreamId::Users, vec![json!({"id": 10, "name": "A"})])
            .await
            .unwrap();

        let record = store
            .insert(StreamId::Users, json!({"name": "B"}))
            .await
            .unwrap();
        assert_eq!(record.id(), RecordId::new(11));
        assert_eq!(record.get("name"), Some(&json!("B")));
        assert_eq!(store.record_count(StreamId::Users).await, 2);
    }

    #[tokio::test]
    async fn insert_after_largest_key_is_rejected() {
        let store = InMemoryBackingStore::new();
        store
            .seed(StreamId::Alerts, vec![json!({"id": i64::MAX})])
            .await
            .unwrap();

        let err = store
            .insert(StreamId::Alerts, json!({"alert_message": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::MalformedResponse { .. }));
        assert_eq!(store.record_count(StreamId::Alerts).await, 1);
    }

    #[tokio::test]
    async fn injected_read_failures_are_consumed() {
        let store = InMemoryBackingStore::new();
        store.fail_reads(StreamId::Alerts, 2);

        assert!(store.read(StreamId::Alerts).await.is_err());
        assert!(store.read(StreamId::Alerts).await.is_err());
        assert!(store.read(StreamId::Alerts).await.is_ok());
        assert!(store.read(StreamId::Users).await.is_ok());
    }

    #[tokio::test]
    async fn subscribers_receive_changes_for_their_stream_only() {
        let store = InMemoryBackingStore::new();
        let mut users = store.subscribe(StreamId::Users).await.unwrap();
        let mut alerts = store.subscribe(StreamId::Alerts).await.unwrap();

        let record = store
            .insert(StreamId::Users, json!({"name": "Ana"}))
            .await
            .unwrap();
        store.update(StreamId::Users, record.id(), json!({"role": "admin"})).await;
        store.delete(StreamId::Users, record.id()).await;

        let Some(Ok(TransportMessage::Json(first))) = users.messages.next().await else {
            panic!("expected a JSON notification");
        };
        assert_eq!(first["type"], "INSERT");
        assert_eq!(first["table"], "users");
        assert_eq!(first["record"]["name"], "Ana");

        let Some(Ok(TransportMessage::Json(second))) = users.messages.next().await else {
            panic!("expected a JSON notification");
        };
        assert_eq!(second["type"], "UPDATE");
        assert_eq!(second["record"]["role"], "admin");
        assert_eq!(second["old_record"]["name"], "Ana");

        let Some(Ok(TransportMessage::Json(third))) = users.messages.next().await else {
            panic!("expected a JSON notification");
        };
        assert_eq!(third["type"], "DELETE");
        assert_eq!(third["old_record"]["id"], record.id().as_i64());

        store.disconnect(StreamId::Alerts);
        assert!(alerts.messages.next().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_ends_the_stream() {
        let store = InMemoryBackingStore::new();
        let mut sub = store.subscribe(StreamId::DeniedAccess).await.unwrap();
        assert_eq!(store.active_subscriptions(StreamId::DeniedAccess), 1);

        store.unsubscribe(sub.handle);
        store.unsubscribe(sub.handle);

        assert_eq!(store.active_subscriptions(StreamId::DeniedAccess), 0);
        assert!(sub.messages.next().await.is_none());
    }

    #[tokio::test]
    async fn update_and_delete_of_missing_rows_report_absence() {
        let store = InMemoryBackingStore::new();
        assert!(
            store
                .update(StreamId::Alerts, RecordId::new(1), json!({}))
                .await
                .is_none()
        );
        assert!(!store.delete(StreamId::Alerts, RecordId::new(1)).await);
    }
}
