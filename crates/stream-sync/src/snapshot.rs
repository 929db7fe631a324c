//! Initial bulk read of a stream.

use std::sync::Arc;

use backing_store::store::order_newest_first;
use backing_store::{BackingStore, TransportError};
use common::{Record, StreamId};

use crate::backoff::RetryPolicy;

/// Reads the current contents of a stream, newest first.
#[derive(Clone)]
pub struct SnapshotLoader {
    store: Arc<dyn BackingStore>,
    policy: RetryPolicy,
}

impl SnapshotLoader {
    pub fn new(store: Arc<dyn BackingStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Performs one time-bounded read.
    ///
    /// Zero rows is an empty vector. Rows tagged with another stream make the
    /// whole response malformed.
    pub async fn load(&self, stream: StreamId) -> backing_store::Result<Vec<Record>> {
        let timeout = self.policy.attempt_timeout();
        let records = tokio::time::timeout(timeout, self.store.read(stream))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        order_newest_first(stream, records)
    }

    /// Reads until a read succeeds, sleeping with backoff between attempts.
    ///
    /// Never returns an error; drop the future to stop retrying.
    #[tracing::instrument(skip(self), fields(stream = %stream))]
    pub async fn load_with_retry(&self, stream: StreamId) -> Vec<Record> {
        let mut attempt: u32 = 0;
        loop {
            match self.load(stream).await {
                Ok(records) => {
                    tracing::info!(
                        records = records.len(),
                        attempts = attempt + 1,
                        "snapshot loaded"
                    );
                    return records;
                }
                Err(e) => {
                    let delay = self.policy.delay(attempt);
                    metrics::counter!("sync_snapshot_failures_total", "stream" => stream.as_str())
                        .increment(1);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "snapshot read failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backing_store::InMemoryBackingStore;
    use common::RecordId;
    use serde_json::json;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5), 0.0)
            .with_attempt_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn empty_stream_loads_as_empty_sequence() {
        let store = InMemoryBackingStore::new();
        let loader = SnapshotLoader::new(Arc::new(store), fast_policy());
        assert!(loader.load(StreamId::Alerts).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_returns_newest_first() {
        let store = InMemoryBackingStore::new();
        store
            .seed(
                StreamId::Attendance,
                vec![json!({"id": 3}), json!({"id": 5})],
            )
            .await
            .unwrap();
        let loader = SnapshotLoader::new(Arc::new(store), fast_policy());

        let records = loader.load(StreamId::Attendance).await.unwrap();
        let ids: Vec<RecordId> = records.iter().map(Record::id).collect();
        assert_eq!(ids, vec![RecordId::new(5), RecordId::new(3)]);
    }

    #[tokio::test]
    async fn unreachable_store_is_a_transport_error() {
        let store = InMemoryBackingStore::new();
        store.fail_reads(StreamId::Users, 1);
        let loader = SnapshotLoader::new(Arc::new(store), fast_policy());

        let err = loader.load(StreamId::Users).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[tokio::test]
    async fn slow_read_times_out() {
        let store = InMemoryBackingStore::new();
        store.set_read_delay(Some(Duration::from_secs(5)));
        let loader = SnapshotLoader::new(Arc::new(store), fast_policy());

        let err = loader.load(StreamId::Users).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn load_with_retry_outlasts_failures() {
        let store = InMemoryBackingStore::new();
        store
            .seed(StreamId::DeniedAccess, vec![json!({"id": 1})])
            .await
            .unwrap();
        store.fail_reads(StreamId::DeniedAccess, 3);
        let loader = SnapshotLoader::new(Arc::new(store), fast_policy());

        let records = loader.load_with_retry(StreamId::DeniedAccess).await;
        assert_eq!(records.len(), 1);
    }
}
