//! Core traits and types for the persistent record store.

use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Named collections held by the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  /// Last successfully fetched restaurant listing
  Restaurants,
  /// Last successfully fetched reviews, keyed by restaurant id
  Reviews,
  /// Writes that never reached the origin
  UnsentWrites,
}

impl Collection {
  pub const ALL: [Collection; 3] = [
    Collection::Restaurants,
    Collection::Reviews,
    Collection::UnsentWrites,
  ];

  /// Stable name used as the storage namespace.
  pub fn name(self) -> &'static str {
    match self {
      Self::Restaurants => "restaurants",
      Self::Reviews => "reviews",
      Self::UnsentWrites => "unsent-writes",
    }
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// A record read back from the store.
#[derive(Debug, Clone)]
pub struct StoredRecord<T> {
  pub key: String,
  pub value: T,
  /// Write sequence; a replaced record gets a new one
  pub seq: i64,
}

/// Durable key/value store organized into named collections.
///
/// Each individual operation is atomic: a reader never observes a
/// partially written record.
pub trait RecordStore: Send + Sync {
  /// Get a record by key.
  fn get<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Result<Option<T>>;

  /// Insert or replace a record.
  fn put<T: Serialize>(&self, collection: Collection, key: &str, value: &T) -> Result<()>;

  /// Delete a record. Deleting a missing key is not an error.
  fn delete(&self, collection: Collection, key: &str) -> Result<bool>;

  /// Delete a record only if it still holds the write `seq` it was read at.
  /// Returns false when the key is gone or was replaced since.
  fn delete_if(&self, collection: Collection, key: &str, seq: i64) -> Result<bool>;

  /// All records in a collection, oldest write first.
  fn get_all<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<StoredRecord<T>>>;

  /// Number of records in a collection.
  fn count(&self, collection: Collection) -> Result<usize>;
}
