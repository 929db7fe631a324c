//! Per-stream synchronization: snapshot seed plus live change application.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use backing_store::BackingStore;
use chrono::{DateTime, Utc};
use common::{ChangeEvent, Record, StreamId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::error::{MalformedEventError, Result, SyncError};
use crate::feed::{ChangeFeedClient, FeedSignal, SubscriptionSlot};
use crate::snapshot::SnapshotLoader;
use crate::view::{Applied, MaterializedView, StreamView, SyncState};

/// The `Loading → Live → Closed` state machine of one stream.
///
/// Holds no locks and spawns nothing; the owning task feeds it one signal at
/// a time.
#[derive(Debug)]
pub struct SyncCore {
    stream: StreamId,
    state: SyncState,
    view: MaterializedView,
    buffer: Vec<ChangeEvent>,
    epoch: u64,
    updated_at: Option<DateTime<Utc>>,
}

impl SyncCore {
    pub fn new(stream: StreamId) -> Self {
        Self {
            stream,
            state: SyncState::Loading,
            view: MaterializedView::new(stream),
            buffer: Vec::new(),
            epoch: 0,
            updated_at: None,
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn view(&self) -> &MaterializedView {
        &self.view
    }

    /// Number of events waiting for the snapshot.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Accepts one change event.
    ///
    /// While loading the event is buffered and `Ok(None)` is returned; once
    /// live it is applied immediately.
    pub fn receive(&mut self, event: ChangeEvent) -> Result<Option<Applied>> {
        if event.stream() != self.stream {
            return Err(MalformedEventError::new(
                self.stream,
                format!("event for {} routed here", event.stream()),
            )
            .into());
        }

        match self.state {
            SyncState::Loading => {
                self.buffer.push(event);
                Ok(None)
            }
            SyncState::Live => {
                let applied = self.view.apply(event);
                if applied.is_visible() {
                    self.updated_at = Some(Utc::now());
                }
                Ok(Some(applied))
            }
            SyncState::Closed => Err(SyncError::Lifecycle {
                stream: self.stream,
            }),
        }
    }

    /// Merges the snapshot, then flushes buffered events in receipt order.
    ///
    /// Returns the number of flushed events. Seeding happens once; a second
    /// snapshot on a live core is ignored.
    pub fn seed(&mut self, records: Vec<Record>) -> Result<usize> {
        match self.state {
            SyncState::Closed => {
                return Err(SyncError::Lifecycle {
                    stream: self.stream,
                });
            }
            SyncState::Live => return Ok(0),
            SyncState::Loading => {}
        }

        self.view.seed(records);
        let buffered = std::mem::take(&mut self.buffer);
        let flushed = buffered.len();
        for event in buffered {
            self.view.apply(event);
        }
        self.state = SyncState::Live;
        self.updated_at = Some(Utc::now());
        Ok(flushed)
    }

    /// Records the start of a new feed epoch. The view is kept as is.
    pub fn start_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Moves to `Closed` from any state, discarding buffered events.
    pub fn close(&mut self) {
        self.state = SyncState::Closed;
        self.buffer.clear();
    }

    /// Immutable snapshot of the current state for readers.
    pub fn to_view(&self) -> StreamView {
        StreamView {
            stream: self.stream,
            state: self.state,
            records: self.view.to_shared(),
            epoch: self.epoch,
            updated_at: self.updated_at,
        }
    }
}

/// Keeps one stream's view in sync with the backing store.
///
/// Two tasks run per stream: the change feed, which pushes normalized events
/// into an ordered queue, and the apply loop, which owns the [`SyncCore`],
/// loads the snapshot and drains the queue one event at a time. The snapshot
/// is read only after the first subscription is established. Readers only
/// ever see published [`StreamView`] copies.
pub struct StreamSynchronizer {
    stream: StreamId,
    store: Arc<dyn BackingStore>,
    publisher: Arc<watch::Sender<StreamView>>,
    shutdown: watch::Sender<bool>,
    slot: SubscriptionSlot,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl StreamSynchronizer {
    /// Starts synchronizing `stream`. Must be called within a tokio runtime.
    pub fn start(stream: StreamId, store: Arc<dyn BackingStore>, config: &SyncConfig) -> Self {
        let publisher = Arc::new(watch::Sender::new(StreamView::loading(stream)));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let feed = ChangeFeedClient::new(stream, Arc::clone(&store), config.retry.clone());
        let slot = feed.slot();
        let loader = SnapshotLoader::new(Arc::clone(&store), config.retry.clone());

        let feed_task = tokio::spawn(feed.run(queue_tx, shutdown_rx.clone()));
        let apply_task = tokio::spawn(apply_loop(
            SyncCore::new(stream),
            loader,
            queue_rx,
            Arc::clone(&publisher),
            shutdown_rx,
        ));

        tracing::debug!(%stream, "synchronizer started");

        Self {
            stream,
            store,
            publisher,
            shutdown,
            slot,
            tasks: Mutex::new(vec![feed_task, apply_task]),
            closed: AtomicBool::new(false),
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Returns the latest published view.
    pub fn view(&self) -> StreamView {
        self.publisher.borrow().clone()
    }

    pub fn state(&self) -> SyncState {
        self.publisher.borrow().state
    }

    /// Returns a receiver notified on every published change.
    pub fn watch(&self) -> watch::Receiver<StreamView> {
        self.publisher.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tears the synchronizer down without waiting.
    ///
    /// Publishes `Closed`, stops both tasks and releases the live
    /// subscription. Calling it again does nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shutdown.send_replace(true);
        self.publisher.send_modify(|view| view.state = SyncState::Closed);

        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }

        let released = self.slot.release(self.store.as_ref());
        tracing::info!(stream = %self.stream, released, "synchronizer closed");
    }
}

impl Drop for StreamSynchronizer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn apply_loop(
    mut core: SyncCore,
    loader: SnapshotLoader,
    mut queue: mpsc::UnboundedReceiver<FeedSignal>,
    publisher: Arc<watch::Sender<StreamView>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stream = core.stream();
    let load = loader.load_with_retry(stream);
    tokio::pin!(load);
    let mut seeded = false;
    let mut queue_open = true;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                core.close();
                break;
            }
            // The read starts once a subscription is live, so every change
            // committed after it is either in the snapshot or on the feed.
            records = &mut load, if !seeded && core.epoch() > 0 => {
                seeded = true;
                let snapshot_len = records.len();
                match core.seed(records) {
                    Ok(flushed) => {
                        tracing::info!(%stream, records = snapshot_len, flushed, "stream live");
                    }
                    Err(e) => {
                        tracing::debug!(%stream, error = %e, "snapshot ignored");
                    }
                }
                publish(&core, &publisher);
            }
            signal = queue.recv(), if queue_open => match signal {
                Some(signal) => {
                    let mut changed = handle_signal(&mut core, signal);
                    while let Ok(signal) = queue.try_recv() {
                        changed |= handle_signal(&mut core, signal);
                    }
                    if changed {
                        publish(&core, &publisher);
                    }
                }
                None => queue_open = false,
            },
        }
    }
}

/// Applies one queued signal. Returns whether readers should see a new view.
fn handle_signal(core: &mut SyncCore, signal: FeedSignal) -> bool {
    let stream = core.stream();
    match signal {
        FeedSignal::EpochStarted(epoch) => {
            core.start_epoch(epoch);
            true
        }
        FeedSignal::Event(event) => {
            let operation = event.operation();
            let key = event.key();
            match core.receive(event) {
                Ok(None) => {
                    metrics::counter!("sync_events_buffered_total", "stream" => stream.as_str())
                        .increment(1);
                    tracing::trace!(%stream, %operation, %key, "event buffered");
                    false
                }
                Ok(Some(applied)) => {
                    metrics::counter!("sync_events_applied_total", "stream" => stream.as_str())
                        .increment(1);
                    tracing::trace!(%stream, %operation, %key, ?applied, "event applied");
                    applied.is_visible()
                }
                Err(SyncError::Lifecycle { .. }) => {
                    tracing::debug!(%stream, %operation, %key, "event after close ignored");
                    false
                }
                Err(e) => {
                    tracing::warn!(%stream, error = %e, "dropping event");
                    false
                }
            }
        }
    }
}

/// Publishes the core's view unless the synchronizer was already closed.
fn publish(core: &SyncCore, publisher: &watch::Sender<StreamView>) {
    let next = core.to_view();
    metrics::gauge!("sync_view_records", "stream" => core.stream().as_str())
        .set(next.records.len() as f64);
    publisher.send_if_modified(|current| {
        if current.state == SyncState::Closed {
            return false;
        }
        *current = next;
        true
    });
}
