//! Namespaced key/value store with per-entry TTL on top of a storage backend.
//!
//! Each logical entry is kept as two physical records:
//! - `<key>|cache|<namespace>` holding the JSON-encoded value
//! - `<key>|expiry|<namespace>` holding the expiry epoch-minute, only when a TTL applies
//!
//! The `_registry_` record lists every namespace ever opened on the backend so
//! that expired entries can be swept across all of them at once.
//!
//! Cache writes are advisory. Backend failures are logged and degrade to a
//! cache miss; they never surface to callers.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::storage::StorageBackend;
use crate::error::{ConfigError, StorageError};

/// Backend key holding the JSON list of known namespaces.
pub const REGISTRY_KEY: &str = "_registry_";

const CACHE_MARKER: &str = "|cache|";
const EXPIRY_MARKER: &str = "|expiry|";

/// TTL cache bound to one namespace of a shared backend.
pub struct Store {
  backend: Arc<dyn StorageBackend>,
  clock: Arc<dyn Clock>,
  namespace: String,
  cache_suffix: String,
  expiry_suffix: String,
  /// TTL in minutes applied when a write doesn't name one
  default_ttl: Option<u32>,
}

impl Store {
  /// Open `namespace` on `backend` using the wall clock.
  pub fn new(
    backend: Arc<dyn StorageBackend>,
    namespace: &str,
    default_ttl: Option<u32>,
  ) -> Result<Self, ConfigError> {
    Self::with_clock(backend, namespace, default_ttl, Arc::new(SystemClock))
  }

  /// Open `namespace` on `backend` with an explicit clock.
  pub fn with_clock(
    backend: Arc<dyn StorageBackend>,
    namespace: &str,
    default_ttl: Option<u32>,
    clock: Arc<dyn Clock>,
  ) -> Result<Self, ConfigError> {
    if namespace.contains('|') {
      return Err(ConfigError::InvalidNamespace(namespace.to_string()));
    }

    let mut namespaces = Self::namespaces(backend.as_ref());
    if !namespaces.iter().any(|ns| ns == namespace) {
      namespaces.push(namespace.to_string());
    }
    match serde_json::to_string(&namespaces) {
      Ok(registry) => {
        if let Err(e) = backend.set(REGISTRY_KEY, &registry) {
          warn!(namespace, error = %e, "failed to update namespace registry");
        }
      }
      Err(e) => warn!(namespace, error = %e, "failed to encode namespace registry"),
    }

    Ok(Self {
      backend,
      clock,
      namespace: namespace.to_string(),
      cache_suffix: format!("{}{}", CACHE_MARKER, namespace),
      expiry_suffix: format!("{}{}", EXPIRY_MARKER, namespace),
      default_ttl: default_ttl.filter(|ttl| *ttl > 0),
    })
  }

  /// Every namespace registered on `backend`.
  pub fn namespaces(backend: &dyn StorageBackend) -> Vec<String> {
    backend
      .get(REGISTRY_KEY)
      .ok()
      .flatten()
      .and_then(|raw| serde_json::from_str(&raw).ok())
      .unwrap_or_else(|| vec![String::new()])
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn default_ttl(&self) -> Option<u32> {
    self.default_ttl
  }

  pub fn backend(&self) -> &Arc<dyn StorageBackend> {
    &self.backend
  }

  fn value_key(&self, key: &str) -> String {
    format!("{}{}", key, self.cache_suffix)
  }

  fn expiry_key(&self, key: &str) -> String {
    format!("{}{}", key, self.expiry_suffix)
  }

  /// Get the value under `key`, or `None` if it is missing, expired or
  /// cannot be decoded as `T`. Expired entries are purged.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let raw = self.raw_value(key)?;

    if self.has_expired(key) {
      debug!(namespace = %self.namespace, key, "purging expired entry");
      self.remove(key);
      return None;
    }

    match serde_json::from_str(&raw) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(namespace = %self.namespace, key, error = %e, "undecodable cache value");
        None
      }
    }
  }

  /// Store `value` under `key`.
  ///
  /// `ttl` is in minutes; `None` or `Some(0)` falls back to the store's
  /// default TTL, and without one the entry never expires.
  pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u32>) {
    let ttl = ttl.filter(|ttl| *ttl > 0).or(self.default_ttl);
    self.write_value(key, value, ttl);
  }

  /// Store `value` under `key` expiring at the epoch-minute `expiry`, or
  /// never when `expiry` is `None`. The default TTL does not apply. An
  /// expiry that has already been reached removes the entry instead.
  pub fn set_until<T: Serialize + ?Sized>(&self, key: &str, value: &T, expiry: Option<i64>) {
    let ttl = match expiry {
      Some(expiry) => {
        let remaining = expiry - self.clock.epoch_minute();
        if remaining <= 0 {
          self.remove(key);
          return;
        }
        Some(u32::try_from(remaining).unwrap_or(u32::MAX))
      }
      None => None,
    };
    self.write_value(key, value, ttl);
  }

  fn write_value<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u32>) {
    let raw = match serde_json::to_string(value) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(namespace = %self.namespace, key, error = %e, "failed to encode cache value");
        return;
      }
    };
    if !self.write_with_recovery(key, || self.write_entry(key, &raw, ttl)) {
      self.remove(key);
    }
  }

  /// Like [`set`](Self::set), but only when `key` is missing or expired.
  pub fn add<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u32>) {
    if self.raw_value(key).is_none() || self.has_expired(key) {
      self.set(key, value, ttl);
    }
  }

  /// Like [`set`](Self::set), but only when `key` holds a live value.
  pub fn replace<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u32>) {
    if self.raw_value(key).is_some() && !self.has_expired(key) {
      self.set(key, value, ttl);
    }
  }

  /// Remove `key` and its expiry record.
  pub fn remove(&self, key: &str) {
    for physical in [self.value_key(key), self.expiry_key(key)] {
      if let Err(e) = self.backend.remove(&physical) {
        warn!(namespace = %self.namespace, key, error = %e, "failed to remove cache record");
      }
    }
  }

  /// Increment the counter under `key` and return the new value.
  pub fn incr(&self, key: &str) -> i64 {
    self.adjust_counter(key, 1)
  }

  /// Decrement the counter under `key` and return the new value.
  pub fn decr(&self, key: &str) -> i64 {
    self.adjust_counter(key, -1)
  }

  /// Whether `key` carries an expiry that has been reached.
  pub fn has_expired(&self, key: &str) -> bool {
    match self.expires_on(key) {
      Some(expiry) => is_expired(expiry, self.clock.epoch_minute()),
      None => false,
    }
  }

  /// Epoch-minute at which `key` expires, if it expires at all.
  pub fn expires_on(&self, key: &str) -> Option<i64> {
    self
      .backend
      .get(&self.expiry_key(key))
      .ok()
      .flatten()
      .and_then(|raw| raw.trim().parse().ok())
  }

  /// Every logical key with a value record in this namespace.
  ///
  /// Expired entries that have not been purged yet are included.
  pub fn keys(&self) -> BTreeSet<String> {
    self
      .physical_keys()
      .iter()
      .filter_map(|k| k.strip_suffix(self.cache_suffix.as_str()))
      .map(String::from)
      .collect()
  }

  /// Every key with an expiry record, mapped to its expiry epoch-minute.
  pub fn expirable_keys(&self) -> BTreeMap<String, i64> {
    let mut result = BTreeMap::new();
    for physical in self.physical_keys() {
      let Some(key) = physical.strip_suffix(self.expiry_suffix.as_str()) else {
        continue;
      };
      let expiry = self
        .backend
        .get(&physical)
        .ok()
        .flatten()
        .and_then(|raw| raw.trim().parse().ok());
      if let Some(expiry) = expiry {
        result.insert(key.to_string(), expiry);
      }
    }
    result
  }

  /// Remove every record in this namespace.
  pub fn flush(&self) {
    let doomed: Vec<String> = self
      .physical_keys()
      .into_iter()
      .filter(|k| k.ends_with(&self.cache_suffix) || k.ends_with(&self.expiry_suffix))
      .collect();

    for physical in doomed {
      if let Err(e) = self.backend.remove(&physical) {
        warn!(namespace = %self.namespace, key = %physical, error = %e, "failed to flush record");
      }
    }
  }

  /// Remove every expired entry in this namespace. Returns how many were removed.
  pub fn flush_expired(&self) -> usize {
    let now = self.clock.epoch_minute();
    let mut removed = 0;
    for (key, expiry) in self.expirable_keys() {
      if is_expired(expiry, now) {
        self.remove(&key);
        removed += 1;
      }
    }
    removed
  }

  /// Remove every expired entry in every namespace on this store's backend.
  pub fn flush_expired_all_namespaces(&self) -> usize {
    flush_expired_all(self.backend.as_ref(), self.clock.as_ref())
  }

  fn raw_value(&self, key: &str) -> Option<String> {
    match self.backend.get(&self.value_key(key)) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(namespace = %self.namespace, key, error = %e, "cache read failed");
        None
      }
    }
  }

  fn physical_keys(&self) -> Vec<String> {
    self.backend.keys().unwrap_or_else(|e| {
      warn!(namespace = %self.namespace, error = %e, "failed to enumerate cache keys");
      Vec::new()
    })
  }

  fn write_entry(&self, key: &str, raw: &str, ttl: Option<u32>) -> Result<(), StorageError> {
    self.backend.set(&self.value_key(key), raw)?;
    match ttl {
      Some(ttl) => {
        let expiry = self.clock.epoch_minute() + i64::from(ttl);
        self.backend.set(&self.expiry_key(key), &expiry.to_string())
      }
      None => self.backend.remove(&self.expiry_key(key)),
    }
  }

  /// A counter write that cannot land leaves the previous value in place
  /// and returns it.
  fn adjust_counter(&self, key: &str, delta: i64) -> i64 {
    let current = self
      .raw_value(key)
      .and_then(|raw| raw.trim().parse::<i64>().ok())
      .unwrap_or(0);
    let value = current + delta;

    let raw = value.to_string();
    if self.write_with_recovery(key, || self.backend.set(&self.value_key(key), &raw)) {
      value
    } else {
      current
    }
  }

  /// Run `write`; on a full backend sweep expired entries in every namespace
  /// and try once more. Returns whether the write landed.
  fn write_with_recovery<F>(&self, key: &str, write: F) -> bool
  where
    F: Fn() -> Result<(), StorageError>,
  {
    let err = match write() {
      Ok(()) => return true,
      Err(e) => e,
    };

    if !err.is_quota_exceeded() {
      warn!(namespace = %self.namespace, key, error = %err, "dropping cache write");
      return false;
    }

    let purged = flush_expired_all(self.backend.as_ref(), self.clock.as_ref());
    debug!(namespace = %self.namespace, key, purged, "quota exceeded, retrying after sweep");
    match write() {
      Ok(()) => true,
      Err(e) => {
        warn!(namespace = %self.namespace, key, error = %e, "dropping cache write after retry");
        false
      }
    }
  }
}

/// Remove expired entries from every registered namespace on `backend`.
/// Returns how many entries were removed.
pub fn flush_expired_all(backend: &dyn StorageBackend, clock: &dyn Clock) -> usize {
  let namespaces = Store::namespaces(backend);
  let now = clock.epoch_minute();

  let keys = match backend.keys() {
    Ok(keys) => keys,
    Err(e) => {
      warn!(error = %e, "failed to enumerate keys for expiry sweep");
      return 0;
    }
  };

  let mut doomed = Vec::new();
  for physical in keys {
    let Some((key, namespace)) = physical.rsplit_once(EXPIRY_MARKER) else {
      continue;
    };
    if !namespaces.iter().any(|ns| ns == namespace) {
      continue;
    }
    let expiry = backend
      .get(&physical)
      .ok()
      .flatten()
      .and_then(|raw| raw.trim().parse::<i64>().ok());
    if expiry.is_some_and(|expiry| is_expired(expiry, now)) {
      doomed.push(format!("{}{}{}", key, CACHE_MARKER, namespace));
      doomed.push(physical.clone());
    }
  }

  for physical in &doomed {
    if let Err(e) = backend.remove(physical) {
      warn!(key = %physical, error = %e, "failed to remove expired record");
    }
  }
  doomed.len() / 2
}

fn is_expired(expiry: i64, now: i64) -> bool {
  expiry <= now
}
