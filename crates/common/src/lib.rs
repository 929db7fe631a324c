//! Shared types for the access-control dashboard.
//!
//! - [`StreamId`] names one of the four mirrored record streams
//! - [`Record`] is an opaque row tagged with its stream and identity key
//! - [`ChangeEvent`] is a normalized insert/update/delete notification

pub mod change;
pub mod record;
pub mod types;

pub use change::{ChangeEvent, Operation, ParseOperationError};
pub use record::{Record, RecordError};
pub use types::{ParseStreamIdError, RecordId, StreamId};
