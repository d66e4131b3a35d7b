//! Named, versioned cache regions holding HTTP responses.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use super::key::hash_key;
use crate::db::Database;
use crate::net::{Response, ResponseSource};

/// Summary of one region for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
  pub name: String,
  pub entries: usize,
}

/// All cache regions in the relay database.
#[derive(Clone)]
pub struct RegionStorage {
  db: Arc<Database>,
}

impl RegionStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Open a region, creating it if absent.
  pub fn open(&self, name: &str) -> Result<CacheRegion> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_regions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create region {}: {}", name, e))?;

    Ok(CacheRegion {
      name: name.to_string(),
      db: Arc::clone(&self.db),
    })
  }

  pub fn exists(&self, name: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let found: Option<String> = conn
      .query_row(
        "SELECT name FROM cache_regions WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up region {}: {}", name, e))?;
    Ok(found.is_some())
  }

  /// Names of every region, oldest first.
  pub fn names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_regions ORDER BY created_at, name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list regions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read region names: {}", e))?;

    Ok(names)
  }

  /// Region names with their entry counts.
  pub fn describe(&self) -> Result<Vec<RegionInfo>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT r.name, COUNT(e.key_hash) FROM cache_regions r
         LEFT JOIN region_entries e ON e.region = r.name
         GROUP BY r.name
         ORDER BY r.created_at, r.name",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let infos = stmt
      .query_map([], |row| {
        let entries: i64 = row.get(1)?;
        Ok(RegionInfo {
          name: row.get(0)?,
          entries: entries as usize,
        })
      })
      .map_err(|e| eyre!("Failed to describe regions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read regions: {}", e))?;

    Ok(infos)
  }

  /// Delete a region and all of its entries. Returns whether it existed.
  pub fn delete(&self, name: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM region_entries WHERE region = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of region {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_regions WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete region {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  /// Look a key up in every region, the way a passthrough request does.
  pub fn match_any(&self, key: &str) -> Result<Option<Response>> {
    let conn = self.db.conn()?;
    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM region_entries
         WHERE key_hash = ?
         ORDER BY stored_at DESC
         LIMIT 1",
        params![hash_key(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to match {}: {}", key, e))?;

    row.map(decode_row).transpose()
  }
}

/// Handle on one region.
#[derive(Clone)]
pub struct CacheRegion {
  name: String,
  db: Arc<Database>,
}

impl CacheRegion {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Stored response for a normalized key, if any.
  pub fn match_key(&self, key: &str) -> Result<Option<Response>> {
    let conn = self.db.conn()?;
    let row: Option<(u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT status, headers, body FROM region_entries
         WHERE region = ? AND key_hash = ?",
        params![self.name, hash_key(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to match {} in {}: {}", key, self.name, e))?;

    row.map(decode_row).transpose()
  }

  /// Store a copy of a response under a normalized key.
  pub fn put(&self, key: &str, response: &Response) -> Result<()> {
    self.put_all(&[(key.to_string(), response.clone())])
  }

  /// Store several responses in one transaction: all or nothing.
  pub fn put_all(&self, entries: &[(String, Response)]) -> Result<()> {
    let conn = self.db.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    // The region may have been purged since it was opened
    tx.execute(
      "INSERT OR IGNORE INTO cache_regions (name) VALUES (?)",
      params![self.name],
    )
    .map_err(|e| eyre!("Failed to create region {}: {}", self.name, e))?;

    for (key, response) in entries {
      let headers = serde_json::to_string(&response.headers)
        .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;
      tx.execute(
        "INSERT OR REPLACE INTO region_entries (region, key_hash, request_key, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          self.name,
          hash_key(key),
          key,
          response.status,
          headers,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store {} in {}: {}", key, self.name, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  pub fn len(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM region_entries WHERE region = ?",
        params![self.name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count region {}: {}", self.name, e))?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

fn decode_row((status, headers, body): (u16, String, Vec<u8>)) -> Result<Response> {
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize stored headers: {}", e))?;

  Ok(Response {
    status,
    headers,
    body,
    source: ResponseSource::Region,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn storage() -> RegionStorage {
    RegionStorage::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  fn page(body: &str) -> Response {
    Response::new(200, body, ResponseSource::Network).with_header("content-type", "text/html")
  }

  #[test]
  fn test_put_and_match() {
    let storage = storage();
    let region = storage.open("static-shell-v1").unwrap();
    region.put("http://h/index.html", &page("<html>")).unwrap();

    let hit = region.match_key("http://h/index.html").unwrap().unwrap();
    assert_eq!(hit.status, 200);
    assert_eq!(hit.body, b"<html>");
    assert_eq!(hit.header("content-type"), Some("text/html"));
    assert_eq!(hit.source, ResponseSource::Region);
    assert!(region.match_key("http://h/other.html").unwrap().is_none());
  }

  #[test]
  fn test_regions_are_separate() {
    let storage = storage();
    let images = storage.open("images-v1").unwrap();
    let map = storage.open("map-v1").unwrap();
    images.put("http://h/img/1.jpg", &page("jpg")).unwrap();

    assert!(map.match_key("http://h/img/1.jpg").unwrap().is_none());
    assert!(storage.match_any("http://h/img/1.jpg").unwrap().is_some());
  }

  #[test]
  fn test_delete_region_removes_entries() {
    let storage = storage();
    let v1 = storage.open("v1").unwrap();
    v1.put("http://h/a", &page("a")).unwrap();

    assert!(storage.delete("v1").unwrap());
    assert!(!storage.exists("v1").unwrap());
    assert!(storage.match_any("http://h/a").unwrap().is_none());
    assert!(!storage.delete("v1").unwrap());
  }

  #[test]
  fn test_describe_counts_entries() {
    let storage = storage();
    let shell = storage.open("shell").unwrap();
    storage.open("empty").unwrap();
    shell
      .put_all(&[
        ("http://h/index.html".to_string(), page("i")),
        ("http://h/restaurant.html".to_string(), page("r")),
      ])
      .unwrap();

    let mut infos = storage.describe().unwrap();
    infos.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(
      infos,
      vec![
        RegionInfo {
          name: "empty".into(),
          entries: 0
        },
        RegionInfo {
          name: "shell".into(),
          entries: 2
        },
      ]
    );
    assert_eq!(shell.len().unwrap(), 2);
  }

  #[test]
  fn test_put_recreates_purged_region() {
    let storage = storage();
    let region = storage.open("map-v1").unwrap();
    storage.delete("map-v1").unwrap();

    region.put("http://h/maps/api/js", &page("js")).unwrap();
    assert!(storage.exists("map-v1").unwrap());
  }
}
