use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{RecordId, StreamId};

/// Errors raised when a row cannot be turned into a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The row is not a JSON object.
    #[error("row for {stream} is not an object")]
    NotAnObject { stream: StreamId },

    /// The row has no integer `id` field.
    #[error("row for {stream} has no integer id")]
    MissingId { stream: StreamId },
}

/// A single row of one stream.
///
/// Field values are passed through untouched; only the `id` field is
/// interpreted. Two records of the same stream are the same row exactly
/// when their ids match.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    stream: StreamId,
    id: RecordId,
    fields: Map<String, Value>,
}

impl Record {
    /// Builds a record from a raw row, reading the identity key from `id`.
    pub fn from_row(stream: StreamId, row: Value) -> Result<Self, RecordError> {
        let Value::Object(fields) = row else {
            return Err(RecordError::NotAnObject { stream });
        };
        Self::from_fields(stream, fields)
    }

    /// Builds a record from an already-decoded field map.
    pub fn from_fields(stream: StreamId, fields: Map<String, Value>) -> Result<Self, RecordError> {
        let id = fields
            .get("id")
            .and_then(Value::as_i64)
            .map(RecordId::new)
            .ok_or(RecordError::MissingId { stream })?;
        Ok(Self { stream, id, fields })
    }

    /// Returns the stream this record belongs to.
    pub fn stream(&self) -> StreamId {
        self.stream
    }

    /// Returns the identity key.
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Returns the raw field map, including `id`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Looks up a single field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_row_reads_identity_key() {
        let record = Record::from_row(
            StreamId::Users,
            json!({"id": 7, "name": "Ana", "card_uid": "A1B2"}),
        )
        .unwrap();
        assert_eq!(record.id(), RecordId::new(7));
        assert_eq!(record.stream(), StreamId::Users);
        assert_eq!(record.get("name"), Some(&json!("Ana")));
    }

    #[test]
    fn from_row_rejects_non_objects() {
        let err = Record::from_row(StreamId::Alerts, json!([1, 2])).unwrap_err();
        assert_eq!(
            err,
            RecordError::NotAnObject {
                stream: StreamId::Alerts
            }
        );
    }

    #[test]
    fn from_row_rejects_missing_or_non_integer_id() {
        let missing = Record::from_row(StreamId::Alerts, json!({"alert_message": "x"}));
        assert!(matches!(missing, Err(RecordError::MissingId { .. })));

        let textual = Record::from_row(StreamId::Alerts, json!({"id": "7"}));
        assert!(matches!(textual, Err(RecordError::MissingId { .. })));
    }

    #[test]
    fn serializes_as_flat_field_object() {
        let row = json!({"id": 3, "card_uid": "FF01", "role": "student"});
        let record = Record::from_row(StreamId::Attendance, row.clone()).unwrap();
        assert_eq!(serde_json::to_value(&record).unwrap(), row);
    }
}
