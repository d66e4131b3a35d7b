//! SQLite implementation of the record store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::traits::{Collection, RecordStore, StoredRecord};
use crate::db::Database;

/// Record store persisted in the relay database.
#[derive(Clone)]
pub struct SqliteRecordStore {
  db: Arc<Database>,
}

impl SqliteRecordStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl RecordStore for SqliteRecordStore {
  fn get<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Result<Option<T>> {
    let conn = self.db.conn()?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM records WHERE collection = ? AND record_key = ?",
        params![collection.name(), key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {} record {}: {}", collection, key, e))?;

    match data {
      Some(data) => {
        let value = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize {} record {}: {}", collection, key, e))?;
        Ok(Some(value))
      }
      None => Ok(None),
    }
  }

  fn put<T: Serialize>(&self, collection: Collection, key: &str, value: &T) -> Result<()> {
    // Serialize before taking the lock so a bad value never reaches the table
    let data = serde_json::to_vec(value)
      .map_err(|e| eyre!("Failed to serialize {} record {}: {}", collection, key, e))?;

    let conn = self.db.conn()?;

    // Single statement: the row is replaced atomically, and seq moves to the tail
    conn
      .execute(
        "INSERT OR REPLACE INTO records (collection, record_key, data, seq, stored_at)
         VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(seq), 0) + 1 FROM records), datetime('now'))",
        params![collection.name(), key, data],
      )
      .map_err(|e| eyre!("Failed to store {} record {}: {}", collection, key, e))?;

    Ok(())
  }

  fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
    let conn = self.db.conn()?;

    let removed = conn
      .execute(
        "DELETE FROM records WHERE collection = ? AND record_key = ?",
        params![collection.name(), key],
      )
      .map_err(|e| eyre!("Failed to delete {} record {}: {}", collection, key, e))?;

    Ok(removed > 0)
  }

  fn delete_if(&self, collection: Collection, key: &str, seq: i64) -> Result<bool> {
    let conn = self.db.conn()?;

    let removed = conn
      .execute(
        "DELETE FROM records WHERE collection = ? AND record_key = ? AND seq = ?",
        params![collection.name(), key, seq],
      )
      .map_err(|e| eyre!("Failed to delete {} record {}: {}", collection, key, e))?;

    Ok(removed > 0)
  }

  fn get_all<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<StoredRecord<T>>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT record_key, data, seq FROM records
         WHERE collection = ?
         ORDER BY seq",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, Vec<u8>, i64)> = stmt
      .query_map(params![collection.name()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .map_err(|e| eyre!("Failed to query {}: {}", collection, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read {} rows: {}", collection, e))?;

    let mut records = Vec::with_capacity(rows.len());
    for (key, data, seq) in rows {
      // One unreadable row must not hide the rest of the collection
      match serde_json::from_slice(&data) {
        Ok(value) => records.push(StoredRecord {
          key,
          value,
          seq,
        }),
        Err(e) => warn!(collection = %collection, key = %key, error = %e, "Skipping unreadable record"),
      }
    }

    Ok(records)
  }

  fn count(&self, collection: Collection) -> Result<usize> {
    let conn = self.db.conn()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM records WHERE collection = ?",
        params![collection.name()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count {}: {}", collection, e))?;

    Ok(count as usize)
  }
}
