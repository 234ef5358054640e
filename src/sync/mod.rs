//! Read/write orchestration between application entities, the cache and a
//! remote data source.
//!
//! - Reads resolve immediately from cache when possible, and always refresh
//!   the entity and cache from the remote in the background
//! - Updates and deletes hit the cache first and roll back if the remote fails
//! - Creates only touch the cache once the remote confirms

mod layer;
mod model;
mod pending;
mod traits;

pub use layer::{SyncLayer, IDS_KEY};
pub use model::{Model, ModelCollection};
pub use pending::Pending;
pub use traits::{
  id_key, Attributes, Collection, Entity, OpKind, Payload, Remote, Resolution, SyncEvent,
  SyncOptions, Target, ID_ATTRIBUTE,
};
