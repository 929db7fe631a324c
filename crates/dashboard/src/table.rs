//! Tabular projection of a stream view, one table per dashboard panel.

use common::{Record, RecordId, StreamId};
use serde::Serialize;
use serde_json::Value;
use stream_sync::{StreamView, SyncState};

struct Column {
    header: &'static str,
    field: &'static str,
    /// Shown instead of an empty value.
    fallback: Option<&'static str>,
}

const fn column(header: &'static str, field: &'static str) -> Column {
    Column {
        header,
        field,
        fallback: None,
    }
}

const USERS: &[Column] = &[
    column("Name", "name"),
    column("UID", "card_uid"),
    column("Role", "role"),
    column("Room", "room_number"),
];

const ATTENDANCE: &[Column] = &[
    column("UID", "card_uid"),
    column("Role", "role"),
    column("Check-In", "check_in"),
    Column {
        header: "Check-Out",
        field: "check_out",
        fallback: Some("Inside"),
    },
    Column {
        header: "Duration",
        field: "duration",
        fallback: Some("-"),
    },
];

const ALERTS: &[Column] = &[
    column("Message", "alert_message"),
    column("Triggered At", "triggered_at"),
];

const DENIED_ACCESS: &[Column] = &[
    column("UID", "card_uid"),
    column("Role", "role"),
    column("Reason", "denial_reason"),
    column("Attempted At", "attempted_at"),
];

fn columns(stream: StreamId) -> &'static [Column] {
    match stream {
        StreamId::Users => USERS,
        StreamId::Attendance => ATTENDANCE,
        StreamId::Alerts => ALERTS,
        StreamId::DeniedAccess => DENIED_ACCESS,
    }
}

/// Panel title for a stream.
pub fn title(stream: StreamId) -> &'static str {
    match stream {
        StreamId::Users => "Users",
        StreamId::Attendance => "Attendance",
        StreamId::Alerts => "Alerts",
        StreamId::DeniedAccess => "Denied Access",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableRow {
    pub id: RecordId,
    pub cells: Vec<String>,
}

/// A stream view rendered as headers plus text cells, newest row first.
#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub stream: StreamId,
    pub title: &'static str,
    pub state: SyncState,
    pub headers: Vec<&'static str>,
    pub rows: Vec<TableRow>,
}

impl Table {
    pub fn from_view(view: &StreamView) -> Self {
        let columns = columns(view.stream);
        Self {
            stream: view.stream,
            title: title(view.stream),
            state: view.state,
            headers: columns.iter().map(|c| c.header).collect(),
            rows: view.records.iter().map(|r| row(columns, r)).collect(),
        }
    }
}

fn row(columns: &[Column], record: &Record) -> TableRow {
    TableRow {
        id: record.id(),
        cells: columns
            .iter()
            .map(|c| cell(record.get(c.field), c.fallback))
            .collect(),
    }
}

/// Renders one value. Missing, null, empty, `false` and zero count as empty.
fn cell(value: Option<&Value>, fallback: Option<&'static str>) -> String {
    let empty = fallback.unwrap_or_default().to_string();
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => empty,
        Some(Value::String(s)) if s.is_empty() => empty,
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => empty,
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
