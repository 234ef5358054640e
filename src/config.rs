use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{Backends, SqliteStorage, Store};
use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Cache namespace; stores sharing a backend never see each other's keys
  pub namespace: String,
  /// Default TTL in minutes (0 or unset: entries never expire)
  pub default_ttl: Option<u32>,
  /// Storage backend: durable, session, memory-shared or memory-private
  pub backend: String,
  /// Raise id-list notifications instead of caching collection ids
  pub externally_managed_ids: bool,
  /// Database file for the durable backend (default: $XDG_DATA_HOME/cachesync/cache.db)
  pub database: Option<PathBuf>,
  /// Page limit for SQLite backends; writes past it hit quota recovery
  pub max_pages: Option<u64>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      namespace: String::new(),
      default_ttl: None,
      backend: "durable".to_string(),
      externally_managed_ids: false,
      database: None,
      max_pages: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cachesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cachesync/config.yaml
  ///
  /// Without a config file the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(ConfigError::NotFound(p.display().to_string()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cachesync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cachesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.display().to_string(),
      source,
    })?;

    Self::parse(&contents).map_err(|source| ConfigError::Parse {
      path: path.display().to_string(),
      source,
    })
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Backend context for this configuration.
  pub fn backends(&self) -> Result<Backends, ConfigError> {
    let database = match &self.database {
      Some(path) => path.clone(),
      None => SqliteStorage::default_path()?,
    };
    Ok(Backends::new(database).with_max_pages(self.max_pages))
  }

  /// Open the configured store on `backends`.
  pub fn open_store(&self, backends: &Backends) -> Result<Store, ConfigError> {
    let backend = backends.resolve_named(&self.backend)?;
    Store::new(backend, &self.namespace, self.default_ttl)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_for_empty_file() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.namespace, "");
    assert_eq!(config.backend, "durable");
    assert_eq!(config.default_ttl, None);
    assert!(!config.externally_managed_ids);
  }

  #[test]
  fn test_parse_full_config() {
    let config = Config::parse(
      r#"
namespace: issues
default_ttl: 30
backend: memory-private
externally_managed_ids: true
database: /tmp/cache.db
max_pages: 1024
"#,
    )
    .unwrap();

    assert_eq!(config.namespace, "issues");
    assert_eq!(config.default_ttl, Some(30));
    assert_eq!(config.backend, "memory-private");
    assert!(config.externally_managed_ids);
    assert_eq!(config.database, Some(PathBuf::from("/tmp/cache.db")));
    assert_eq!(config.max_pages, Some(1024));
  }

  #[test]
  fn test_unknown_backend_fails_when_opening() {
    let config = Config {
      backend: "globalStorage".to_string(),
      ..Config::default()
    };
    let backends = Backends::new(PathBuf::from("unused.db"));
    assert!(matches!(
      config.open_store(&backends),
      Err(ConfigError::UnknownBackend(_))
    ));
  }

  #[test]
  fn test_open_store_uses_namespace_and_ttl() {
    let config = Config {
      namespace: "people".to_string(),
      default_ttl: Some(15),
      backend: "memory-shared".to_string(),
      ..Config::default()
    };
    let backends = Backends::new(PathBuf::from("unused.db"));
    let store = config.open_store(&backends).unwrap();

    assert_eq!(store.namespace(), "people");
    assert_eq!(store.default_ttl(), Some(15));
  }

  #[test]
  fn test_missing_explicit_path() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "namespace: files\nbackend: session\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.namespace, "files");
    assert_eq!(config.backend, "session");
  }
}
