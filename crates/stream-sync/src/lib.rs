//! Snapshot + change-feed synchronization for the access dashboard.
//!
//! This crate keeps one in-memory view per record stream consistent with the
//! backing store:
//! - [`SnapshotLoader`] performs the initial bulk read, retried with backoff
//! - [`ChangeFeedClient`] holds the live subscription and normalizes messages
//! - [`StreamSynchronizer`] merges both into a [`MaterializedView`]
//! - [`DashboardAggregator`] runs one synchronizer per stream

pub mod backoff;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod feed;
pub mod snapshot;
pub mod synchronizer;
pub mod view;

pub use backoff::RetryPolicy;
pub use config::SyncConfig;
pub use dashboard::{DashboardAggregator, DashboardSnapshot};
pub use error::{MalformedEventError, Result, SyncError};
pub use feed::ChangeFeedClient;
pub use snapshot::SnapshotLoader;
pub use synchronizer::{StreamSynchronizer, SyncCore};
pub use view::{Applied, MaterializedView, StreamView, SyncState};
