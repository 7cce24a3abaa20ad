//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::db::Database;
use crate::net::Response;

use super::CacheEntry;

/// Trait for cache storage backends.
///
/// `put` replaces any existing entry with the same generation and identity in
/// one step. Two concurrent writers to the same key resolve last-writer-wins.
pub trait CacheStorage: Send + Sync {
  /// Get the entry for a request identity within a generation.
  fn get(&self, generation: &str, identity: &str) -> Result<Option<CacheEntry>>;

  /// Store an entry, overwriting any previous one.
  fn put(&self, entry: &CacheEntry) -> Result<()>;

  /// Delete every entry of a generation, returning how many were removed.
  fn delete_generation(&self, generation: &str) -> Result<usize>;

  /// All generation tags that currently hold entries.
  fn generations(&self) -> Result<Vec<String>>;

  /// Number of stored entries per generation tag.
  fn entry_counts(&self) -> Result<BTreeMap<String, usize>>;
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl CacheStorage for SqliteStorage {
  fn get(&self, generation: &str, identity: &str) -> Result<Option<CacheEntry>> {
    let conn = self.db.conn()?;

    let row: Option<(String, String, u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT identity, resource_class, status, headers, body, stored_at
         FROM cache_entries WHERE generation = ? AND key_hash = ?",
        params![generation, key_hash(identity)],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    let (identity, class, status, headers, body, stored_at) = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;

    Ok(Some(CacheEntry {
      identity,
      class: class.parse()?,
      response: Response::new(status, headers, body),
      stored_at: parse_datetime(&stored_at)?,
      generation: generation.to_string(),
    }))
  }

  fn put(&self, entry: &CacheEntry) -> Result<()> {
    let conn = self.db.conn()?;
    let headers = serde_json::to_string(&entry.response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (generation, key_hash, identity, resource_class, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          entry.generation,
          key_hash(&entry.identity),
          entry.identity,
          entry.class.as_str(),
          entry.response.status,
          headers,
          entry.response.body,
          format_datetime(entry.stored_at),
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn delete_generation(&self, generation: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "DELETE FROM cache_entries WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete generation {}: {}", generation, e))
  }

  fn generations(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT generation FROM cache_entries ORDER BY generation")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let generations = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation: {}", e))?;

    Ok(generations)
  }

  fn entry_counts(&self) -> Result<BTreeMap<String, usize>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT generation, COUNT(*) FROM cache_entries GROUP BY generation")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let counts = stmt
      .query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
      })
      .map_err(|e| eyre!("Failed to count entries: {}", e))?
      .collect::<rusqlite::Result<BTreeMap<_, _>>>()
      .map_err(|e| eyre!("Failed to read entry count: {}", e))?;

    Ok(counts)
  }
}

/// SHA256 of the request identity, for stable fixed-length keys
fn key_hash(identity: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(identity.as_bytes());
  hex::encode(hasher.finalize())
}

pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ResourceClass;

  fn storage() -> SqliteStorage {
    SqliteStorage::new(Database::open_in_memory().unwrap())
  }

  fn entry(generation: &str, identity: &str, body: &str) -> CacheEntry {
    CacheEntry {
      identity: identity.to_string(),
      class: ResourceClass::HtmlPage,
      response: Response::new(
        200,
        vec![("content-type".to_string(), "text/html".to_string())],
        body.as_bytes().to_vec(),
      ),
      stored_at: Utc::now(),
      generation: generation.to_string(),
    }
  }

  #[test]
  fn test_put_then_get() {
    let storage = storage();
    let stored = entry("app-v1", "GET http://localhost/", "home");
    storage.put(&stored).unwrap();

    let loaded = storage.get("app-v1", "GET http://localhost/").unwrap().unwrap();
    assert_eq!(loaded.response, stored.response);
    assert_eq!(loaded.class, ResourceClass::HtmlPage);
    assert_eq!(
      loaded.stored_at.timestamp_millis(),
      stored.stored_at.timestamp_millis()
    );
  }

  #[test]
  fn test_miss_in_other_generation() {
    let storage = storage();
    storage
      .put(&entry("app-v1", "GET http://localhost/", "home"))
      .unwrap();
    assert!(storage.get("app-v2", "GET http://localhost/").unwrap().is_none());
  }

  #[test]
  fn test_last_writer_wins() {
    let storage = storage();
    storage
      .put(&entry("app-v1", "GET http://localhost/", "first"))
      .unwrap();
    storage
      .put(&entry("app-v1", "GET http://localhost/", "second"))
      .unwrap();

    let loaded = storage.get("app-v1", "GET http://localhost/").unwrap().unwrap();
    assert_eq!(loaded.response.text(), "second");
    assert_eq!(storage.entry_counts().unwrap().get("app-v1"), Some(&1));
  }

  #[test]
  fn test_delete_generation() {
    let storage = storage();
    storage.put(&entry("app-v1", "GET http://localhost/a", "a")).unwrap();
    storage.put(&entry("app-v1", "GET http://localhost/b", "b")).unwrap();
    storage.put(&entry("app-v2", "GET http://localhost/a", "a")).unwrap();

    assert_eq!(storage.generations().unwrap(), vec!["app-v1", "app-v2"]);
    assert_eq!(
      storage.entry_counts().unwrap(),
      BTreeMap::from([("app-v1".to_string(), 2), ("app-v2".to_string(), 1)])
    );
    assert_eq!(storage.delete_generation("app-v1").unwrap(), 2);
    assert_eq!(storage.generations().unwrap(), vec!["app-v2"]);
  }
}
