pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{Record, RecordId, StreamId};
pub use error::{Result, TransportError};
pub use memory::InMemoryBackingStore;
pub use postgres::PostgresBackingStore;
pub use store::{BackingStore, MessageStream, Subscription, SubscriptionHandle, TransportMessage};
