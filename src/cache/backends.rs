//! Storage backend selection.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::storage::{MemoryStorage, SqliteStorage, StorageBackend};
use crate::error::{ConfigError, StorageError};

/// Which backend a store should live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
  /// SQLite database file, persisted across process restarts
  Durable,
  /// SQLite in-memory database, lives as long as its [`Backends`]
  Session,
  /// The memory storage shared by every store resolved from one [`Backends`]
  MemoryShared,
  /// A fresh memory storage per resolution
  MemoryPrivate,
}

impl FromStr for StorageKind {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "durable" => Ok(Self::Durable),
      "session" => Ok(Self::Session),
      "memory-shared" | "memory" => Ok(Self::MemoryShared),
      "memory-private" => Ok(Self::MemoryPrivate),
      _ => Err(ConfigError::UnknownBackend(s.to_string())),
    }
  }
}

/// Owner of the backends stores are resolved against.
///
/// Holds the shared memory storage and lazily opened SQLite backends, so two
/// stores resolved from the same `Backends` with the same kind share data.
pub struct Backends {
  database: PathBuf,
  max_pages: Option<u64>,
  memory: Arc<MemoryStorage>,
  durable: Mutex<Option<Arc<SqliteStorage>>>,
  session: Mutex<Option<Arc<SqliteStorage>>>,
}

impl Backends {
  /// Create a backend context whose durable database lives at `database`.
  pub fn new(database: PathBuf) -> Self {
    Self {
      database,
      max_pages: None,
      memory: Arc::new(MemoryStorage::new()),
      durable: Mutex::new(None),
      session: Mutex::new(None),
    }
  }

  /// Limit the SQLite backends to `pages` pages.
  pub fn with_max_pages(mut self, pages: Option<u64>) -> Self {
    self.max_pages = pages;
    self
  }

  pub fn database(&self) -> &std::path::Path {
    &self.database
  }

  /// The shared memory storage.
  pub fn memory(&self) -> Arc<MemoryStorage> {
    Arc::clone(&self.memory)
  }

  /// Resolve a backend from its selector string.
  pub fn resolve_named(&self, selector: &str) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    self.resolve(selector.parse()?)
  }

  pub fn resolve(&self, kind: StorageKind) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    let backend: Arc<dyn StorageBackend> = match kind {
      StorageKind::Durable => self.sqlite(&self.durable, || SqliteStorage::open(&self.database))?,
      StorageKind::Session => self.sqlite(&self.session, SqliteStorage::open_in_memory)?,
      StorageKind::MemoryShared => self.memory(),
      StorageKind::MemoryPrivate => Arc::new(MemoryStorage::new()),
    };
    Ok(backend)
  }

  fn sqlite<F>(
    &self,
    slot: &Mutex<Option<Arc<SqliteStorage>>>,
    open: F,
  ) -> Result<Arc<SqliteStorage>, ConfigError>
  where
    F: FnOnce() -> Result<SqliteStorage, StorageError>,
  {
    let mut slot = slot.lock().map_err(|_| StorageError::Poisoned)?;
    if let Some(storage) = slot.as_ref() {
      return Ok(Arc::clone(storage));
    }

    let mut storage = open()?;
    if let Some(pages) = self.max_pages {
      storage = storage.with_max_pages(pages)?;
    }
    debug!(database = %self.database.display(), "opened sqlite storage");

    let storage = Arc::new(storage);
    *slot = Some(Arc::clone(&storage));
    Ok(storage)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_selectors() {
    assert_eq!("durable".parse::<StorageKind>().unwrap(), StorageKind::Durable);
    assert_eq!("Session".parse::<StorageKind>().unwrap(), StorageKind::Session);
    assert_eq!(
      "memory-shared".parse::<StorageKind>().unwrap(),
      StorageKind::MemoryShared
    );
    assert_eq!(
      "memory-private".parse::<StorageKind>().unwrap(),
      StorageKind::MemoryPrivate
    );
    assert!(matches!(
      "globalStorage".parse::<StorageKind>(),
      Err(ConfigError::UnknownBackend(_))
    ));
  }

  #[test]
  fn test_shared_memory_is_shared() {
    let backends = Backends::new(PathBuf::from("unused.db"));
    let a = backends.resolve(StorageKind::MemoryShared).unwrap();
    let b = backends.resolve(StorageKind::MemoryShared).unwrap();
    let private = backends.resolve(StorageKind::MemoryPrivate).unwrap();

    a.set("k", "v").unwrap();
    assert_eq!(b.get("k").unwrap().as_deref(), Some("v"));
    assert_eq!(private.get("k").unwrap(), None);
  }

  #[test]
  fn test_session_is_reused_within_context() {
    let backends = Backends::new(PathBuf::from("unused.db"));
    let a = backends.resolve(StorageKind::Session).unwrap();
    a.set("k", "v").unwrap();

    let b = backends.resolve_named("session").unwrap();
    assert_eq!(b.get("k").unwrap().as_deref(), Some("v"));

    let other = Backends::new(PathBuf::from("unused.db"));
    let c = other.resolve(StorageKind::Session).unwrap();
    assert_eq!(c.get("k").unwrap(), None);
  }

  #[test]
  fn test_durable_opens_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    let backends = Backends::new(path.clone());
    backends.resolve_named("durable").unwrap().set("k", "v").unwrap();
    drop(backends);

    assert!(path.exists());
    let reopened = Backends::new(path);
    let backend = reopened.resolve(StorageKind::Durable).unwrap();
    assert_eq!(backend.get("k").unwrap().as_deref(), Some("v"));
  }

  #[test]
  fn test_unknown_selector_fails_at_resolution() {
    let backends = Backends::new(PathBuf::from("unused.db"));
    assert!(matches!(
      backends.resolve_named("localStorage"),
      Err(ConfigError::UnknownBackend(_))
    ));
  }
}
