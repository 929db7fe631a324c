use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One of the four record streams mirrored by the dashboard.
///
/// The textual form doubles as the backing table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamId {
    Users,
    Attendance,
    Alerts,
    DeniedAccess,
}

impl StreamId {
    /// Every stream, in dashboard order.
    pub const ALL: [StreamId; 4] = [
        StreamId::Users,
        StreamId::Attendance,
        StreamId::Alerts,
        StreamId::DeniedAccess,
    ];

    /// Returns the stream name, which is also its table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamId::Users => "users",
            StreamId::Attendance => "attendance",
            StreamId::Alerts => "alerts",
            StreamId::DeniedAccess => "denied_access",
        }
    }

    /// Returns the notification channel the store publishes changes on.
    pub fn channel(&self) -> &'static str {
        match self {
            StreamId::Users => "users_changes",
            StreamId::Attendance => "attendance_changes",
            StreamId::Alerts => "alerts_changes",
            StreamId::DeniedAccess => "denied_access_changes",
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stream: {0}")]
pub struct ParseStreamIdError(pub String);

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(StreamId::Users),
            "attendance" => Ok(StreamId::Attendance),
            "alerts" => Ok(StreamId::Alerts),
            "denied_access" => Ok(StreamId::DeniedAccess),
            other => Err(ParseStreamIdError(other.to_string())),
        }
    }
}

/// Identity key of a record.
///
/// Assigned by the backing store, strictly increasing within a stream and
/// never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RecordId(i64);

impl RecordId {
    /// Creates a record ID from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw key value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns the key following this one, or `None` once keys are exhausted.
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<RecordId> for i64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}
