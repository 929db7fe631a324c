use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Record, RecordId, StreamId};

/// Kind of change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operation: {0}")]
pub struct ParseOperationError(pub String);

impl FromStr for Operation {
    type Err = ParseOperationError;

    /// Parses `INSERT`, `update`, `Delete`, ... ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("insert") {
            Ok(Operation::Insert)
        } else if s.eq_ignore_ascii_case("update") {
            Ok(Operation::Update)
        } else if s.eq_ignore_ascii_case("delete") {
            Ok(Operation::Delete)
        } else {
            Err(ParseOperationError(s.to_string()))
        }
    }
}

/// A normalized change notification for one stream.
///
/// Inserts and updates carry the full post-image; deletes only the key.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(Record),
    Update(Record),
    Delete { stream: StreamId, id: RecordId },
}

impl ChangeEvent {
    /// Returns the stream the change applies to.
    pub fn stream(&self) -> StreamId {
        match self {
            ChangeEvent::Insert(record) | ChangeEvent::Update(record) => record.stream(),
            ChangeEvent::Delete { stream, .. } => *stream,
        }
    }

    /// Returns the identity key of the affected record.
    pub fn key(&self) -> RecordId {
        match self {
            ChangeEvent::Insert(record) | ChangeEvent::Update(record) => record.id(),
            ChangeEvent::Delete { id, .. } => *id,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            ChangeEvent::Insert(_) => Operation::Insert,
            ChangeEvent::Update(_) => Operation::Update,
            ChangeEvent::Delete { .. } => Operation::Delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_parsing_ignores_case() {
        assert_eq!("INSERT".parse::<Operation>(), Ok(Operation::Insert));
        assert_eq!("Update".parse::<Operation>(), Ok(Operation::Update));
        assert_eq!("delete".parse::<Operation>(), Ok(Operation::Delete));
        assert!("TRUNCATE".parse::<Operation>().is_err());
    }

    #[test]
    fn accessors_cover_every_variant() {
        let record = Record::from_row(StreamId::Alerts, json!({"id": 4})).unwrap();

        let insert = ChangeEvent::Insert(record.clone());
        assert_eq!(insert.operation(), Operation::Insert);
        assert_eq!(insert.key(), RecordId::new(4));
        assert_eq!(insert.stream(), StreamId::Alerts);

        let update = ChangeEvent::Update(record);
        assert_eq!(update.operation(), Operation::Update);

        let delete = ChangeEvent::Delete {
            stream: StreamId::Users,
            id: RecordId::new(2),
        };
        assert_eq!(delete.operation(), Operation::Delete);
        assert_eq!(delete.key(), RecordId::new(2));
        assert_eq!(delete.stream(), StreamId::Users);
    }
}
