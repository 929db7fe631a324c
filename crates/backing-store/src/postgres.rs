use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::{
    Record, Result, StreamId, TransportError,
    store::{BackingStore, Subscription, SubscriptionHandle, TransportMessage, order_newest_first},
};

/// PostgreSQL-backed store.
///
/// Reads are plain `SELECT`s over the stream's table. Changes arrive through
/// `LISTEN <table>_changes`, fed by the trigger installed by the migrations.
#[derive(Clone)]
pub struct PostgresBackingStore {
    pool: PgPool,
    listeners: Arc<Mutex<HashMap<SubscriptionHandle, AbortHandle>>>,
}

impl PostgresBackingStore {
    /// Creates a new PostgreSQL backing store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            listeners: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Number of listener tasks not yet released.
    pub fn open_listeners(&self) -> usize {
        self.lock_listeners().len()
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionHandle, AbortHandle>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BackingStore for PostgresBackingStore {
    async fn read(&self, stream: StreamId) -> Result<Vec<Record>> {
        // Table names come from a closed enum, never from input.
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t ORDER BY t.id DESC",
            stream.as_str()
        );
        let rows: Vec<serde_json::Value> = sqlx::query_scalar(&sql).fetch_all(&self.pool).await?;

        let records = rows
            .into_iter()
            .map(|row| Record::from_row(stream, row))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TransportError::MalformedResponse {
                stream,
                reason: e.to_string(),
            })?;

        order_newest_first(stream, records)
    }

    #[tracing::instrument(skip(self), fields(stream = %stream))]
    async fn subscribe(&self, stream: StreamId) -> Result<Subscription> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(stream.channel()).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    received = listener.try_recv() => match received {
                        Ok(Some(notification)) => {
                            metrics::counter!("store_notifications_total", "stream" => stream.as_str())
                                .increment(1);
                            let message = TransportMessage::text(notification.payload());
                            if tx.send(Ok(message)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            // Notifications sent while disconnected are lost.
                            tracing::warn!(%stream, "listener connection lost");
                            let _ = tx.send(Err(TransportError::Closed(stream)));
                            break;
                        }
                        Err(e) => {
                            let _ = tx.send(Err(TransportError::Database(e)));
                            break;
                        }
                    },
                }
            }
        });

        let handle = SubscriptionHandle::new();
        self.lock_listeners().insert(handle, task.abort_handle());
        tracing::debug!(%handle, "listening for changes");

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
        if let Some(task) = self.lock_listeners().remove(&handle) {
            task.abort();
        }
    }
}
