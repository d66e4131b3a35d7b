//! Persistent record store.
//!
//! Durable, named-collection key/value storage that survives restarts:
//! - `restaurants`: the last listing fetched from the origin
//! - `reviews`: the last reviews fetched per restaurant
//! - `unsent-writes`: the outbox of writes still owed to the origin

mod sqlite;
mod traits;

pub use sqlite::SqliteRecordStore;
pub use traits::{Collection, RecordStore, StoredRecord};
