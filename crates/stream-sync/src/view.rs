//! Materialized views and the immutable snapshots handed to readers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{ChangeEvent, Record, RecordId, StreamId};
use serde::Serialize;

/// Lifecycle state of a stream synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Snapshot in flight; incoming events are buffered.
    Loading,
    /// Snapshot merged; events are applied as they arrive.
    Live,
    /// Torn down. Terminal.
    Closed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Loading => "loading",
            SyncState::Live => "live",
            SyncState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of merging one change into a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new key was added.
    Inserted,
    /// An existing record's content was replaced in place.
    Replaced,
    /// The record was already present with identical content.
    Unchanged,
    /// A present record was removed.
    Removed,
    /// Delete for a key that is not present.
    Absent,
    /// Insert or update for a key that was already deleted.
    Stale,
}

impl Applied {
    /// Whether the visible sequence changed.
    pub fn is_visible(&self) -> bool {
        matches!(self, Applied::Inserted | Applied::Replaced | Applied::Removed)
    }
}

/// Ordered, deduplicated records of one stream.
///
/// Records are kept newest first (identity key descending) with at most one
/// record per key. Because keys are assigned in increasing order, a record
/// with a key above every present key lands at the front, and replacing a
/// record never moves it.
///
/// Deleted keys are remembered: the store never reuses a key, so any insert
/// or update that arrives for a deleted key is a stale redelivery. The set
/// holds one key per delete seen this session and is never pruned; a stale
/// insert may target any deleted key, including ones below every retained row.
#[derive(Debug, Clone)]
pub struct MaterializedView {
    stream: StreamId,
    rows: BTreeMap<RecordId, Record>,
    tombstones: BTreeSet<RecordId>,
}

impl MaterializedView {
    /// Creates an empty view.
    pub fn new(stream: StreamId) -> Self {
        Self {
            stream,
            rows: BTreeMap::new(),
            tombstones: BTreeSet::new(),
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Merges snapshot rows with the insert rule.
    pub fn seed(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            self.upsert(record);
        }
    }

    /// Applies a change event.
    ///
    /// The caller is responsible for routing only this stream's events here.
    pub fn apply(&mut self, event: ChangeEvent) -> Applied {
        match event {
            ChangeEvent::Insert(record) | ChangeEvent::Update(record) => self.upsert(record),
            ChangeEvent::Delete { id, .. } => self.remove(id),
        }
    }

    fn upsert(&mut self, record: Record) -> Applied {
        let id = record.id();
        if self.tombstones.contains(&id) {
            return Applied::Stale;
        }
        match self.rows.get_mut(&id) {
            Some(existing) if *existing == record => Applied::Unchanged,
            Some(existing) => {
                *existing = record;
                Applied::Replaced
            }
            None => {
                self.rows.insert(id, record);
                Applied::Inserted
            }
        }
    }

    fn remove(&mut self, id: RecordId) -> Applied {
        self.tombstones.insert(id);
        match self.rows.remove(&id) {
            Some(_) => Applied::Removed,
            None => Applied::Absent,
        }
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.rows.get(&id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates records newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.rows.values().rev()
    }

    /// Keys newest first.
    pub fn ids(&self) -> Vec<RecordId> {
        self.rows.keys().rev().copied().collect()
    }

    /// Copies the current sequence into a shareable, immutable slice.
    pub fn to_shared(&self) -> Arc<[Record]> {
        self.iter().cloned().collect()
    }
}

/// Read-only snapshot of one stream, as published to readers.
#[derive(Debug, Clone, Serialize)]
pub struct StreamView {
    pub stream: StreamId,
    pub state: SyncState,
    /// Records newest first.
    pub records: Arc<[Record]>,
    /// Number of feed connections established so far.
    pub epoch: u64,
    /// When the visible sequence last changed.
    pub updated_at: Option<DateTime<Utc>>,
}

impl StreamView {
    /// An empty view in `Loading` state.
    pub fn loading(stream: StreamId) -> Self {
        Self {
            stream,
            state: SyncState::Loading,
            records: Arc::from(Vec::new()),
            epoch: 0,
            updated_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.records.iter().map(Record::id).collect()
    }
}
