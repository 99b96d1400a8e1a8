//! SQLite implementation of the bucket and snapshot stores.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{BucketStats, CachedResponse, ResourceStore, SnapshotStore};
use crate::request::{RequestKey, ResponseSnapshot};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Throwaway database, gone when dropped.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("lastgood").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Captured responses, one row per (bucket, request identity).
-- REPLACE re-inserts with a new id, so id order is insertion order.
CREATE TABLE IF NOT EXISTS resource_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bucket TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    inserted_at TEXT NOT NULL,
    UNIQUE (bucket, request_key)
);

CREATE INDEX IF NOT EXISTS idx_resource_cache_bucket
    ON resource_cache(bucket, id);

-- Endpoint snapshots (opaque JSON)
CREATE TABLE IF NOT EXISTS snapshots (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

impl ResourceStore for SqliteStorage {
  fn get(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<(String, u16, Option<String>, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, content_type, body, inserted_at FROM resource_cache
         WHERE bucket = ? AND request_key = ?",
        params![bucket, key.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    match row {
      Some((url, status, content_type, body, inserted_at)) => Ok(Some(CachedResponse {
        snapshot: ResponseSnapshot {
          url,
          status,
          content_type,
          body,
        },
        inserted_at: parse_datetime(&inserted_at)?,
      })),
      None => Ok(None),
    }
  }

  fn put(
    &self,
    bucket: &str,
    key: &RequestKey,
    snapshot: &ResponseSnapshot,
    inserted_at: DateTime<Utc>,
    max_entries: usize,
  ) -> Result<Vec<RequestKey>> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO resource_cache
         (bucket, request_key, url, status, content_type, body, inserted_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        bucket,
        key.as_str(),
        snapshot.url,
        snapshot.status,
        snapshot.content_type,
        snapshot.body,
        format_datetime(inserted_at)
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    let count: i64 = tx
      .query_row(
        "SELECT COUNT(*) FROM resource_cache WHERE bucket = ?",
        params![bucket],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count bucket entries: {}", e))?;
    let count = count as usize;

    let mut evicted = Vec::new();
    if count > max_entries {
      let victims: Vec<(i64, String)> = {
        let mut stmt = tx
          .prepare(
            "SELECT id, request_key FROM resource_cache
             WHERE bucket = ? ORDER BY id ASC LIMIT ?",
          )
          .map_err(|e| eyre!("Failed to prepare eviction query: {}", e))?;
        let rows = stmt
          .query_map(params![bucket, (count - max_entries) as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })
          .map_err(|e| eyre!("Failed to select eviction victims: {}", e))?;
        rows
          .collect::<rusqlite::Result<_>>()
          .map_err(|e| eyre!("Failed to read eviction victims: {}", e))?
      };

      for (id, request_key) in victims {
        tx.execute("DELETE FROM resource_cache WHERE id = ?", params![id])
          .map_err(|e| eyre!("Failed to evict cache entry: {}", e))?;
        evicted.push(RequestKey::from_hash(request_key));
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(evicted)
  }

  fn evict(&self, bucket: &str, key: &RequestKey) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM resource_cache WHERE bucket = ? AND request_key = ?",
        params![bucket, key.as_str()],
      )
      .map_err(|e| eyre!("Failed to evict cache entry: {}", e))?;
    Ok(removed > 0)
  }

  fn len(&self, bucket: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM resource_cache WHERE bucket = ?",
        params![bucket],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count bucket entries: {}", e))?;
    Ok(count as usize)
  }

  fn purge_older_than(&self, bucket: &str, cutoff: DateTime<Utc>) -> Result<usize> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM resource_cache WHERE bucket = ? AND inserted_at < ?",
        params![bucket, format_datetime(cutoff)],
      )
      .map_err(|e| eyre!("Failed to purge bucket {}: {}", bucket, e))
  }

  fn stats(&self) -> Result<Vec<BucketStats>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT bucket, COUNT(*), MIN(inserted_at) FROM resource_cache
         GROUP BY bucket ORDER BY bucket",
      )
      .map_err(|e| eyre!("Failed to prepare stats query: {}", e))?;

    let rows: Vec<(String, i64, Option<String>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query bucket stats: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read bucket stats: {}", e))?;

    rows
      .into_iter()
      .map(|(name, entries, oldest)| {
        Ok(BucketStats {
          name,
          entries: entries as usize,
          oldest: oldest.as_deref().map(parse_datetime).transpose()?,
        })
      })
      .collect()
  }
}

impl SnapshotStore for SqliteStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT value FROM snapshots WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read snapshot {}: {}", key, e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO snapshots (key, value, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to store snapshot {}: {}", key, e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;
  use reqwest::Method;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("https://trip.example").unwrap().join(path).unwrap();
    RequestKey::new(&Method::GET, &url)
  }

  #[test]
  fn test_round_trip_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let now = Utc::now();
    let snapshot = ResponseSnapshot::new("https://trip.example/", 200, "<html>")
      .with_content_type("text/html");

    storage.put("pages", &key("/"), &snapshot, now, 8).unwrap();
    let cached = storage.get("pages", &key("/")).unwrap().unwrap();

    assert_eq!(cached.snapshot, snapshot);
    // Stored with microsecond precision
    assert!((cached.inserted_at - now).num_milliseconds().abs() < 1);
    assert!(storage.get("images", &key("/")).unwrap().is_none());
  }

  #[test]
  fn test_eviction_keeps_max_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let now = Utc::now();
    let snapshot = ResponseSnapshot::new("/", 200, "x");

    for i in 0..4 {
      storage
        .put("images", &key(&format!("/{}.png", i)), &snapshot, now, 4)
        .unwrap();
    }
    let evicted = storage
      .put("images", &key("/4.png"), &snapshot, now, 4)
      .unwrap();

    assert_eq!(evicted, vec![key("/0.png")]);
    assert_eq!(storage.len("images").unwrap(), 4);
    assert!(storage.get("images", &key("/0.png")).unwrap().is_none());
  }

  #[test]
  fn test_replace_refreshes_insertion_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let now = Utc::now();
    let snapshot = ResponseSnapshot::new("/", 200, "x");

    storage.put("pages", &key("/a"), &snapshot, now, 2).unwrap();
    storage.put("pages", &key("/b"), &snapshot, now, 2).unwrap();
    storage.put("pages", &key("/a"), &snapshot, now, 2).unwrap();
    let evicted = storage.put("pages", &key("/c"), &snapshot, now, 2).unwrap();

    assert_eq!(evicted, vec![key("/b")]);
  }

  #[test]
  fn test_purge_and_stats() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let now = Utc::now();
    let snapshot = ResponseSnapshot::new("/", 200, "x");

    storage
      .put("pages", &key("/old"), &snapshot, now - Duration::days(3), 8)
      .unwrap();
    storage.put("pages", &key("/new"), &snapshot, now, 8).unwrap();
    storage.put("images", &key("/a.png"), &snapshot, now, 8).unwrap();

    let stats = storage.stats().unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].name, "images");
    assert_eq!(stats[1].entries, 2);

    let purged = storage
      .purge_older_than("pages", now - Duration::days(1))
      .unwrap();
    assert_eq!(purged, 1);
    assert_eq!(storage.len("pages").unwrap(), 1);
  }

  #[test]
  fn test_snapshot_overwrite() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.set_item("accounting-data", "{\"v\":1}").unwrap();
    storage.set_item("accounting-data", "{\"v\":2}").unwrap();
    assert_eq!(
      storage.get_item("accounting-data").unwrap().as_deref(),
      Some("{\"v\":2}")
    );
    assert_eq!(storage.get_item("missing").unwrap(), None);
  }
}
