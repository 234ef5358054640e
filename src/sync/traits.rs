//! Collaborator traits and types consumed by the sync layer.

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::{RemoteError, SyncError};

/// Flat attribute map of an entity.
pub type Attributes = Map<String, Value>;

/// Attribute holding an entity's identifier.
pub const ID_ATTRIBUTE: &str = "id";

/// Cache key for an entity identifier. Null ids have no key.
pub fn id_key(id: &Value) -> Option<String> {
  match id {
    Value::Null => None,
    Value::String(s) => Some(s.clone()),
    other => Some(other.to_string()),
  }
}

/// A domain object with an optional identifier and a set of attributes.
///
/// Implementations use interior mutability: the sync layer merges remote
/// attributes into entities it only holds shared references to.
pub trait Entity: Send + Sync {
  /// Identifier, absent for entities not yet persisted remotely.
  fn id(&self) -> Option<Value> {
    self.get(ID_ATTRIBUTE).filter(|id| !id.is_null())
  }

  fn get(&self, attr: &str) -> Option<Value>;

  /// Merge `attrs` into the entity.
  fn set(&self, attrs: &Attributes);

  /// Full current attribute set.
  fn to_serializable(&self) -> Attributes;

  /// The collection this entity belongs to, if any.
  fn collection(&self) -> Option<Arc<dyn Collection>>;
}

/// Ordered set of entities of one kind.
pub trait Collection: Send + Sync {
  fn members(&self) -> Vec<Arc<dyn Entity>>;

  /// Replace every member with `members`.
  fn reset(&self, members: &[Attributes]);

  /// Add or update `members` without removing existing ones.
  fn incremental_update(&self, members: &[Attributes]);

  /// Whether the collection tracks its cached id list itself. When true the
  /// sync layer raises [`SyncEvent::CollectionIds`] instead of writing it.
  fn manages_ids(&self) -> bool {
    false
  }
}

/// Operation requested of the sync layer and the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
  Read,
  Create,
  Update,
  Delete,
}

impl fmt::Display for OpKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      OpKind::Read => "read",
      OpKind::Create => "create",
      OpKind::Update => "update",
      OpKind::Delete => "delete",
    };
    f.write_str(name)
  }
}

/// What an operation acts on.
#[derive(Clone)]
pub enum Target {
  Entity(Arc<dyn Entity>),
  Collection(Arc<dyn Collection>),
}

impl fmt::Debug for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Target::Entity(entity) => f.debug_tuple("Entity").field(&entity.id()).finish(),
      Target::Collection(collection) => f
        .debug_tuple("Collection")
        .field(&collection.members().len())
        .finish(),
    }
  }
}

/// Data returned by the remote.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
  One(Attributes),
  Many(Vec<Attributes>),
}

impl Payload {
  pub fn kind(&self) -> &'static str {
    match self {
      Payload::One(_) => "single",
      Payload::Many(_) => "list",
    }
  }

  pub(crate) fn into_one(self) -> Result<Attributes, SyncError> {
    match self {
      Payload::One(attrs) => Ok(attrs),
      other => Err(SyncError::UnexpectedPayload {
        expected: "single",
        got: other.kind(),
      }),
    }
  }

  pub(crate) fn into_many(self) -> Result<Vec<Attributes>, SyncError> {
    match self {
      Payload::Many(list) => Ok(list),
      other => Err(SyncError::UnexpectedPayload {
        expected: "list",
        got: other.kind(),
      }),
    }
  }
}

/// The network side: performs the actual remote read or write.
pub trait Remote: Send + Sync + 'static {
  fn call(
    &self,
    kind: OpKind,
    target: &Target,
    params: &Attributes,
  ) -> BoxFuture<'static, Result<Payload, RemoteError>>;
}

impl<F, Fut> Remote for F
where
  F: Fn(OpKind, &Target, &Attributes) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Payload, RemoteError>> + Send + 'static,
{
  fn call(
    &self,
    kind: OpKind,
    target: &Target,
    params: &Attributes,
  ) -> BoxFuture<'static, Result<Payload, RemoteError>> {
    Box::pin(self(kind, target, params))
  }
}

/// What a sync operation resolves with.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
  /// Attributes for a single entity: remote attributes, or the cached fields
  /// that differ from the entity when served from cache
  Entity(Attributes),
  /// Member attribute sets for a collection, in order
  Collection(Vec<Attributes>),
}

impl Resolution {
  pub fn as_entity(&self) -> Option<&Attributes> {
    match self {
      Resolution::Entity(attrs) => Some(attrs),
      Resolution::Collection(_) => None,
    }
  }

  pub fn as_collection(&self) -> Option<&[Attributes]> {
    match self {
      Resolution::Collection(members) => Some(members),
      Resolution::Entity(_) => None,
    }
  }
}

/// Change notifications raised by the sync layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
  /// New cached id list for a collection whose ids are managed externally
  CollectionIds { ids: Vec<Value>, incremental: bool },
  /// A failed remote write was undone in the cache
  RolledBack { kind: OpKind, id: Value },
}

type SuccessCallback = Box<dyn FnOnce(&Resolution) + Send>;
type ErrorCallback = Box<dyn FnOnce(&SyncError) + Send>;

/// Per-call options.
#[derive(Default)]
pub struct SyncOptions {
  /// Merge fetched collection members instead of resetting the collection
  pub incremental: bool,
  /// Passed through to the remote untouched
  pub params: Attributes,
  /// Set once the operation has been dispatched: the next update of the
  /// target comes from the remote
  pub from_server: bool,
  pub(crate) on_success: Option<SuccessCallback>,
  pub(crate) on_error: Option<ErrorCallback>,
}

impl SyncOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn incremental(mut self, incremental: bool) -> Self {
    self.incremental = incremental;
    self
  }

  pub fn param(mut self, name: &str, value: Value) -> Self {
    self.params.insert(name.to_string(), value);
    self
  }

  /// Callback run when the returned future resolves.
  pub fn on_success<F>(mut self, callback: F) -> Self
  where
    F: FnOnce(&Resolution) + Send + 'static,
  {
    self.on_success = Some(Box::new(callback));
    self
  }

  /// Callback run when the returned future rejects.
  pub fn on_error<F>(mut self, callback: F) -> Self
  where
    F: FnOnce(&SyncError) + Send + 'static,
  {
    self.on_error = Some(Box::new(callback));
    self
  }
}

impl fmt::Debug for SyncOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SyncOptions")
      .field("incremental", &self.incremental)
      .field("params", &self.params)
      .field("from_server", &self.from_server)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_id_key() {
    assert_eq!(id_key(&json!("m1")).as_deref(), Some("m1"));
    assert_eq!(id_key(&json!(7)).as_deref(), Some("7"));
    assert_eq!(id_key(&Value::Null), None);
  }

  #[test]
  fn test_payload_shape_mismatch() {
    let err = Payload::Many(vec![]).into_one().unwrap_err();
    assert_eq!(
      err,
      SyncError::UnexpectedPayload {
        expected: "single",
        got: "list"
      }
    );
  }
}
