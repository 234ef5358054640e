//! Error types shared by the cache and sync layers.

use thiserror::Error;

/// Failure reported by a [`StorageBackend`](crate::cache::StorageBackend).
#[derive(Debug, Error)]
pub enum StorageError {
  /// The medium is full. Callers may reclaim space and retry.
  #[error("storage quota exceeded")]
  QuotaExceeded,

  #[error("sqlite error: {0}")]
  Sqlite(rusqlite::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("storage lock poisoned")]
  Poisoned,
}

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    match e.sqlite_error_code() {
      Some(rusqlite::ErrorCode::DiskFull) => StorageError::QuotaExceeded,
      _ => StorageError::Sqlite(e),
    }
  }
}

impl StorageError {
  pub fn is_quota_exceeded(&self) -> bool {
    matches!(self, StorageError::QuotaExceeded)
  }
}

/// Invalid construction arguments. Raised when a store or layer is built,
/// never from an individual cache call.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("unsupported storage backend '{0}' (expected durable, session, memory-shared or memory-private)")]
  UnknownBackend(String),

  #[error("invalid namespace '{0}': namespaces may not contain '|'")]
  InvalidNamespace(String),

  #[error("could not determine data directory")]
  NoDataDir,

  #[error("config file not found: {0}")]
  NotFound(String),

  #[error("failed to read config file {path}: {source}")]
  Read {
    path: String,
    source: std::io::Error,
  },

  #[error("failed to parse config file {path}: {source}")]
  Parse {
    path: String,
    source: serde_yaml::Error,
  },

  #[error("failed to open storage backend: {0}")]
  Storage(#[from] StorageError),
}

/// Failure reported by the remote collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RemoteError(pub String);

impl From<&str> for RemoteError {
  fn from(s: &str) -> Self {
    RemoteError(s.to_string())
  }
}

impl From<String> for RemoteError {
  fn from(s: String) -> Self {
    RemoteError(s)
  }
}

/// Rejection of a sync operation's returned future.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
  #[error("remote operation failed: {0}")]
  Remote(#[from] RemoteError),

  #[error("entity has no identifier")]
  MissingId,

  #[error("entity has neither an identifier nor an owning collection")]
  MissingCollection,

  #[error("{0} is not supported on a collection")]
  CollectionWrite(String),

  #[error("remote returned a {got} payload where {expected} was expected")]
  UnexpectedPayload {
    expected: &'static str,
    got: &'static str,
  },

  #[error("remote task did not complete: {0}")]
  Task(String),
}
