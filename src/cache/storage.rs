//! Storage backend trait with in-memory and SQLite implementations.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{ConfigError, StorageError};

/// Minimal ordered key/value substrate a [`Store`](super::Store) is built on.
///
/// Enumeration through `len`/`key` only has to be stable for the duration of
/// one pass over the keys; writes in between may reorder it.
pub trait StorageBackend: Send + Sync {
  /// Get the raw value stored under `key`.
  fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

  /// Store `value` under `key`, replacing any previous value.
  ///
  /// Returns [`StorageError::QuotaExceeded`] when the medium is full.
  fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<(), StorageError>;

  /// Number of stored keys.
  fn len(&self) -> Result<usize, StorageError>;

  /// Key at position `index` in enumeration order.
  fn key(&self, index: usize) -> Result<Option<String>, StorageError>;

  fn is_empty(&self) -> Result<bool, StorageError> {
    Ok(self.len()? == 0)
  }

  /// Snapshot of every key in enumeration order.
  fn keys(&self) -> Result<Vec<String>, StorageError> {
    let len = self.len()?;
    let mut keys = Vec::with_capacity(len);
    for index in 0..len {
      if let Some(key) = self.key(index)? {
        keys.push(key);
      }
    }
    Ok(keys)
  }
}

const PROBE_KEY: &str = "_cachesync_probe_";

/// Check that a backend accepts writes.
pub fn is_supported(backend: &dyn StorageBackend) -> bool {
  backend.set(PROBE_KEY, PROBE_KEY).is_ok() && backend.remove(PROBE_KEY).is_ok()
}

// ============================================================================
// In-memory storage
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
  values: HashMap<String, String>,
  order: Vec<String>,
  used_bytes: usize,
}

/// Insertion-ordered in-memory storage with no persistence.
///
/// An optional byte quota (sum of key and value lengths) makes `set` report
/// [`StorageError::QuotaExceeded`] the way a full durable medium would.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  inner: Mutex<MemoryInner>,
  quota_bytes: Option<usize>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Create a memory storage that rejects writes past `quota_bytes`.
  pub fn with_quota(quota_bytes: usize) -> Self {
    Self {
      inner: Mutex::new(MemoryInner::default()),
      quota_bytes: Some(quota_bytes),
    }
  }

  /// Remove every key.
  pub fn clear(&self) -> Result<(), StorageError> {
    let mut inner = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
    *inner = MemoryInner::default();
    Ok(())
  }
}

impl StorageBackend for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let inner = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(inner.values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let mut inner = self.inner.lock().map_err(|_| StorageError::Poisoned)?;

    let previous = inner.values.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
    let used = inner.used_bytes - previous + key.len() + value.len();
    if let Some(quota) = self.quota_bytes {
      if used > quota {
        return Err(StorageError::QuotaExceeded);
      }
    }

    if inner.values.insert(key.to_string(), value.to_string()).is_none() {
      inner.order.push(key.to_string());
    }
    inner.used_bytes = used;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let mut inner = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
    if let Some(value) = inner.values.remove(key) {
      inner.used_bytes -= key.len() + value.len();
      inner.order.retain(|k| k != key);
    }
    Ok(())
  }

  fn len(&self) -> Result<usize, StorageError> {
    let inner = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(inner.order.len())
  }

  fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
    let inner = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(inner.order.get(index).cloned())
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    let inner = self.inner.lock().map_err(|_| StorageError::Poisoned)?;
    Ok(inner.order.clone())
  }
}

// ============================================================================
// SQLite storage
// ============================================================================

/// SQLite-based storage, durable when opened on a file.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for the key/value table. Rowid order is the enumeration order.
const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl SqliteStorage {
  /// Open (or create) a database file at `path`.
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    Self::from_connection(conn)
  }

  /// Open a private in-memory database that lives as long as this value.
  pub fn open_in_memory() -> Result<Self, StorageError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  /// Default database path under the user's data directory.
  pub fn default_path() -> Result<PathBuf, ConfigError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(ConfigError::NoDataDir)?;

    Ok(data_dir.join("cachesync").join("cache.db"))
  }

  /// Cap the database at `pages` pages; writes past it fail with
  /// [`StorageError::QuotaExceeded`].
  pub fn with_max_pages(self, pages: u64) -> Result<Self, StorageError> {
    {
      let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
      // The pragma echoes the effective limit back as a row.
      conn.query_row(&format!("PRAGMA max_page_count = {}", pages), [], |_| Ok(()))?;
    }
    Ok(self)
  }

  fn from_connection(conn: Connection) -> Result<Self, StorageError> {
    conn.execute_batch(STORAGE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl StorageBackend for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    // Upsert keeps the rowid, so overwriting does not move the key.
    conn.execute(
      "INSERT INTO kv_store (key, value) VALUES (?, ?)
       ON CONFLICT(key) DO UPDATE SET value = excluded.value",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    conn.execute("DELETE FROM kv_store WHERE key = ?", params![key])?;
    Ok(())
  }

  fn len(&self) -> Result<usize, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv_store", [], |row| row.get(0))?;
    Ok(count as usize)
  }

  fn key(&self, index: usize) -> Result<Option<String>, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let key = conn
      .query_row(
        "SELECT key FROM kv_store ORDER BY rowid LIMIT 1 OFFSET ?",
        params![index as i64],
        |row| row.get(0),
      )
      .optional()?;
    Ok(key)
  }

  fn keys(&self) -> Result<Vec<String>, StorageError> {
    let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
    let mut stmt = conn.prepare("SELECT key FROM kv_store ORDER BY rowid")?;
    let keys = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(backend: &dyn StorageBackend) {
    assert_eq!(backend.len().unwrap(), 0);
    assert_eq!(backend.get("a").unwrap(), None);

    backend.set("a", "1").unwrap();
    backend.set("b", "2").unwrap();
    backend.set("a", "3").unwrap();

    assert_eq!(backend.get("a").unwrap().as_deref(), Some("3"));
    assert_eq!(backend.len().unwrap(), 2);
    assert_eq!(backend.key(0).unwrap().as_deref(), Some("a"));
    assert_eq!(backend.key(1).unwrap().as_deref(), Some("b"));
    assert_eq!(backend.key(2).unwrap(), None);
    assert_eq!(backend.keys().unwrap(), vec!["a", "b"]);

    backend.remove("a").unwrap();
    backend.remove("a").unwrap();
    assert_eq!(backend.get("a").unwrap(), None);
    assert_eq!(backend.keys().unwrap(), vec!["b"]);
  }

  #[test]
  fn test_memory_storage_contract() {
    exercise(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_in_memory_contract() {
    exercise(&SqliteStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_file_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.set("k", "\"v\"").unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert_eq!(storage.get("k").unwrap().as_deref(), Some("\"v\""));
  }

  #[test]
  fn test_memory_quota_exceeded() {
    let storage = MemoryStorage::with_quota(10);
    storage.set("ab", "cdef").unwrap();

    let err = storage.set("xyz", "0123").unwrap_err();
    assert!(err.is_quota_exceeded());

    // Overwriting with a value of the same size fits.
    storage.set("ab", "wxyz").unwrap();

    storage.remove("ab").unwrap();
    storage.set("xyz", "0123").unwrap();
  }

  #[test]
  fn test_sqlite_max_pages_reports_quota() {
    let storage = SqliteStorage::open_in_memory()
      .unwrap()
      .with_max_pages(4)
      .unwrap();
    let big = "x".repeat(4096);

    let mut result = Ok(());
    for i in 0..64 {
      result = storage.set(&format!("key-{}", i), &big);
      if result.is_err() {
        break;
      }
    }
    assert!(matches!(result, Err(StorageError::QuotaExceeded)));
  }

  #[test]
  fn test_memory_clear() {
    let storage = MemoryStorage::new();
    storage.set("a", "1").unwrap();
    storage.clear().unwrap();
    assert!(storage.is_empty().unwrap());
  }

  #[test]
  fn test_is_supported() {
    let storage = MemoryStorage::new();
    assert!(is_supported(&storage));
    assert!(storage.is_empty().unwrap());

    assert!(!is_supported(&MemoryStorage::with_quota(1)));
  }
}
