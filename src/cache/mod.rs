//! TTL key/value cache over a pluggable storage backend.
//!
//! - `StorageBackend` is the ordered key/value substrate (memory or SQLite)
//! - `Store` adds namespacing, per-entry expiry and quota recovery on top
//! - `Backends` resolves a backend selector to a shared backend instance

mod backends;
mod clock;
mod storage;
mod store;

pub use backends::{Backends, StorageKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use storage::{is_supported, MemoryStorage, SqliteStorage, StorageBackend};
pub use store::{flush_expired_all, Store, REGISTRY_KEY};
