//! Client-side caching layer between an application's data access and a
//! remote data source.
//!
//! [`cache::Store`] is a namespaced key/value cache with per-entry TTL over a
//! pluggable [`cache::StorageBackend`]. [`sync::SyncLayer`] builds on it to
//! serve stale-but-immediate reads while the remote fetch is in flight, and
//! to apply writes optimistically with rollback on remote failure.

pub mod cache;
pub mod config;
pub mod error;
pub mod sync;

pub use error::{ConfigError, RemoteError, StorageError, SyncError};
