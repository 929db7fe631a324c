//! Owner of the four stream synchronizers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use backing_store::BackingStore;
use common::StreamId;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::synchronizer::StreamSynchronizer;
use crate::view::StreamView;

/// Point-in-time copy of all four views.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub users: StreamView,
    pub attendance: StreamView,
    pub alerts: StreamView,
    pub denied_access: StreamView,
}

impl DashboardSnapshot {
    pub fn get(&self, stream: StreamId) -> &StreamView {
        match stream {
            StreamId::Users => &self.users,
            StreamId::Attendance => &self.attendance,
            StreamId::Alerts => &self.alerts,
            StreamId::DeniedAccess => &self.denied_access,
        }
    }

    /// Views in dashboard order.
    pub fn iter(&self) -> impl Iterator<Item = &StreamView> {
        StreamId::ALL.into_iter().map(|stream| self.get(stream))
    }
}

/// Runs one [`StreamSynchronizer`] per stream and shuts them down together.
///
/// Streams progress independently: a stalled or failing stream never holds
/// back the others.
pub struct DashboardAggregator {
    users: StreamSynchronizer,
    attendance: StreamSynchronizer,
    alerts: StreamSynchronizer,
    denied_access: StreamSynchronizer,
    shut_down: AtomicBool,
}

impl DashboardAggregator {
    /// Starts all four synchronizers. Must be called within a tokio runtime.
    pub fn start(store: Arc<dyn BackingStore>, config: SyncConfig) -> Self {
        tracing::info!(retry = %config.retry, "starting dashboard synchronizers");
        let start = |stream| StreamSynchronizer::start(stream, Arc::clone(&store), &config);
        Self {
            users: start(StreamId::Users),
            attendance: start(StreamId::Attendance),
            alerts: start(StreamId::Alerts),
            denied_access: start(StreamId::DeniedAccess),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn synchronizer(&self, stream: StreamId) -> &StreamSynchronizer {
        match stream {
            StreamId::Users => &self.users,
            StreamId::Attendance => &self.attendance,
            StreamId::Alerts => &self.alerts,
            StreamId::DeniedAccess => &self.denied_access,
        }
    }

    /// Returns the latest view of one stream.
    pub fn view(&self, stream: StreamId) -> StreamView {
        self.synchronizer(stream).view()
    }

    /// Returns a receiver notified whenever `stream`'s view changes.
    pub fn watch(&self, stream: StreamId) -> watch::Receiver<StreamView> {
        self.synchronizer(stream).watch()
    }

    /// Returns the latest views of all four streams.
    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            users: self.users.view(),
            attendance: self.attendance.view(),
            alerts: self.alerts.view(),
            denied_access: self.denied_access.view(),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Closes every synchronizer. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for stream in StreamId::ALL {
            self.synchronizer(stream).close();
        }
        tracing::info!("dashboard synchronizers shut down");
    }
}

impl Drop for DashboardAggregator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
