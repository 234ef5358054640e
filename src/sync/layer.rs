//! Sync layer that serves reads from cache while revalidating against the
//! remote, and applies writes to the cache optimistically.

use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::pending::Pending;
use super::traits::{
  id_key, Attributes, Collection, Entity, OpKind, Payload, Remote, Resolution, SyncEvent,
  SyncOptions, Target, ID_ATTRIBUTE,
};
use crate::cache::{Backends, Store};
use crate::config::Config;
use crate::error::{ConfigError, SyncError};

/// Cache key holding the ordered member ids of the last fetched collection.
pub const IDS_KEY: &str = "__ids__";

type RemoteFuture = BoxFuture<'static, Result<Resolution, SyncError>>;

/// Orchestrates reads and writes between a [`Store`] and a [`Remote`].
pub struct SyncLayer {
  store: Arc<Store>,
  remote: Arc<dyn Remote>,
  /// Raise `SyncEvent::CollectionIds` instead of writing `__ids__`
  externally_managed_ids: bool,
  events: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl SyncLayer {
  pub fn new<R: Remote>(store: Store, remote: R) -> Self {
    Self {
      store: Arc::new(store),
      remote: Arc::new(remote),
      externally_managed_ids: false,
      events: None,
    }
  }

  /// Build a layer whose store is opened as described by `config`.
  pub fn from_config<R: Remote>(
    config: &Config,
    backends: &Backends,
    remote: R,
  ) -> Result<Self, ConfigError> {
    let store = config.open_store(backends)?;
    Ok(Self::new(store, remote).with_externally_managed_ids(config.externally_managed_ids))
  }

  pub fn with_externally_managed_ids(mut self, enabled: bool) -> Self {
    self.externally_managed_ids = enabled;
    self
  }

  /// Send change notifications to `events`.
  pub fn with_events(mut self, events: mpsc::UnboundedSender<SyncEvent>) -> Self {
    self.events = Some(events);
    self
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  /// Run `kind` against `target`.
  ///
  /// The remote side is spawned on the current tokio runtime and runs to
  /// completion whether or not the handle is awaited. Outside a runtime the
  /// operation is rejected with [`SyncError::Task`] before touching the cache.
  /// Callbacks in `options` are consumed, and `options.from_server` is set
  /// once the operation is dispatched.
  pub fn perform(&self, kind: OpKind, target: Target, options: &mut SyncOptions) -> Pending {
    let on_success = options.on_success.take();
    let on_error = options.on_error.take();

    let runtime = match Handle::try_current() {
      Ok(runtime) => runtime,
      Err(e) => {
        let error = SyncError::Task(e.to_string());
        warn!(op = %kind, error = %error, "no runtime to run sync operation");
        if let Some(callback) = on_error {
          callback(&error);
        }
        return Pending::rejected(error);
      }
    };
    let params = options.params.clone();

    let (immediate, remote) = match (kind, target) {
      (OpKind::Read, Target::Entity(entity)) => match entity.id().as_ref().and_then(id_key) {
        Some(key) => self.read_entity(entity, key, params),
        None => match entity.collection() {
          Some(collection) => self.read_collection(collection, params, options.incremental),
          None => (None, rejected(SyncError::MissingCollection)),
        },
      },
      (OpKind::Read, Target::Collection(collection)) => {
        self.read_collection(collection, params, options.incremental)
      }
      (OpKind::Create, Target::Entity(entity)) => self.create(entity, params),
      (OpKind::Update, Target::Entity(entity)) => self.update(entity, params),
      (OpKind::Delete, Target::Entity(entity)) => self.destroy(entity, params),
      (kind, Target::Collection(_)) => (None, rejected(SyncError::CollectionWrite(kind.to_string()))),
    };

    let task = match &immediate {
      Some(resolution) => {
        if let Some(callback) = on_success {
          callback(resolution);
        }
        runtime.spawn(remote)
      }
      None => runtime.spawn(async move {
        let result = remote.await;
        match &result {
          Ok(resolution) => {
            if let Some(callback) = on_success {
              callback(resolution);
            }
          }
          Err(e) => {
            if let Some(callback) = on_error {
              callback(e);
            }
          }
        }
        result
      }),
    };

    options.from_server = true;
    Pending::new(immediate, task)
  }

  /// Single entity read. Resolves now with the cached fields that disagree
  /// with the entity, if the entity is cached; the remote refresh always runs.
  fn read_entity(
    &self,
    entity: Arc<dyn Entity>,
    key: String,
    params: Attributes,
  ) -> (Option<Resolution>, RemoteFuture) {
    let cached: Option<Attributes> = self.store.get(&key);
    let immediate = cached.map(|cached| Resolution::Entity(changed_fields(&cached, entity.as_ref())));
    debug!(namespace = %self.store.namespace(), key = %key, hit = immediate.is_some(), "entity read");

    let request = self
      .remote
      .call(OpKind::Read, &Target::Entity(Arc::clone(&entity)), &params);
    let store = Arc::clone(&self.store);

    let remote = async move {
      let attrs = request
        .await
        .map_err(|e| {
          warn!(key = %key, error = %e, "remote entity read failed");
          SyncError::from(e)
        })?
        .into_one()?;
      entity.set(&attrs);
      store.set(&key, &entity.to_serializable(), None);
      Ok::<_, SyncError>(Resolution::Entity(attrs))
    };
    (immediate, Box::pin(remote))
  }

  /// Collection read. Resolves now with the cached members listed in
  /// `__ids__`, if present; the remote refresh always runs.
  fn read_collection(
    &self,
    collection: Arc<dyn Collection>,
    params: Attributes,
    incremental: bool,
  ) -> (Option<Resolution>, RemoteFuture) {
    let cached_ids: Option<Vec<Value>> = self.store.get(IDS_KEY);
    let immediate = cached_ids.map(|ids| Resolution::Collection(self.cached_members(&ids)));
    debug!(namespace = %self.store.namespace(), hit = immediate.is_some(), "collection read");

    let request = self.remote.call(
      OpKind::Read,
      &Target::Collection(Arc::clone(&collection)),
      &params,
    );
    let layer = self.clone();

    let remote = async move {
      let members = request
        .await
        .map_err(|e| {
          warn!(error = %e, "remote collection read failed");
          SyncError::from(e)
        })?
        .into_many()?;

      for attrs in &members {
        if let Some(key) = attrs.get(ID_ATTRIBUTE).and_then(id_key) {
          layer.store.set(&key, attrs, None);
        }
      }
      let ids = unique_ids(members.iter().filter_map(|attrs| attrs.get(ID_ATTRIBUTE).cloned()));
      layer.publish_ids(Some(collection.as_ref()), ids, incremental);

      if incremental {
        collection.incremental_update(&members);
      } else {
        collection.reset(&members);
      }
      Ok::<_, SyncError>(Resolution::Collection(members))
    };
    (immediate, Box::pin(remote))
  }

  /// Create. The cache is only touched once the remote confirms.
  fn create(&self, entity: Arc<dyn Entity>, params: Attributes) -> (Option<Resolution>, RemoteFuture) {
    let request = self
      .remote
      .call(OpKind::Create, &Target::Entity(Arc::clone(&entity)), &params);
    let layer = self.clone();

    let remote = async move {
      let attrs = request.await?.into_one()?;
      entity.set(&attrs);

      let Some(id) = entity.id() else {
        return Ok(Resolution::Entity(attrs));
      };
      if let Some(key) = id_key(&id) {
        layer.store.set(&key, &entity.to_serializable(), None);
      }

      let collection = entity.collection();
      let existing: Option<Vec<Value>> = layer.store.get(IDS_KEY);
      if existing.is_some() || collection.is_some() {
        let mut ids = existing.unwrap_or_default();
        if let Some(collection) = &collection {
          ids.extend(collection.members().iter().filter_map(|member| member.id()));
        }
        ids.push(id);
        layer.publish_ids(collection.as_deref(), unique_ids(ids), true);
      }
      Ok::<_, SyncError>(Resolution::Entity(attrs))
    };
    (None, Box::pin(remote))
  }

  /// Optimistic update: cache first, roll back if the remote rejects.
  fn update(&self, entity: Arc<dyn Entity>, params: Attributes) -> (Option<Resolution>, RemoteFuture) {
    let Some(id) = entity.id() else {
      return (None, rejected(SyncError::MissingId));
    };
    let Some(key) = id_key(&id) else {
      return (None, rejected(SyncError::MissingId));
    };

    let prior = self.prior_entry(&key);
    self.store.set(&key, &entity.to_serializable(), None);

    let request = self
      .remote
      .call(OpKind::Update, &Target::Entity(Arc::clone(&entity)), &params);
    let layer = self.clone();

    let remote = async move {
      match request.await.map_err(SyncError::from).and_then(Payload::into_one) {
        Ok(attrs) => {
          entity.set(&attrs);
          layer.store.set(&key, &entity.to_serializable(), None);
          Ok(Resolution::Entity(attrs))
        }
        Err(e) => {
          layer.rollback(OpKind::Update, id, &key, prior);
          Err(e)
        }
      }
    };
    (None, Box::pin(remote))
  }

  /// Optimistic delete: drop from cache first, restore if the remote rejects.
  fn destroy(&self, entity: Arc<dyn Entity>, params: Attributes) -> (Option<Resolution>, RemoteFuture) {
    let Some(id) = entity.id() else {
      return (None, rejected(SyncError::MissingId));
    };
    let Some(key) = id_key(&id) else {
      return (None, rejected(SyncError::MissingId));
    };

    let prior = self.prior_entry(&key);
    self.store.remove(&key);

    let request = self
      .remote
      .call(OpKind::Delete, &Target::Entity(Arc::clone(&entity)), &params);
    let layer = self.clone();

    let remote = async move {
      match request.await {
        Ok(payload) => Ok(Resolution::Entity(payload.into_one().unwrap_or_default())),
        Err(e) => {
          layer.rollback(OpKind::Delete, id, &key, prior);
          Err(SyncError::from(e))
        }
      }
    };
    (None, Box::pin(remote))
  }

  /// Live value under `key` with its expiry, for restoring after a failed write.
  fn prior_entry(&self, key: &str) -> Option<(Value, Option<i64>)> {
    let value = self.store.get(key)?;
    Some((value, self.store.expires_on(key)))
  }

  /// Restore the cache entry for `key` to what it held before `kind`,
  /// including the expiry it had.
  fn rollback(&self, kind: OpKind, id: Value, key: &str, prior: Option<(Value, Option<i64>)>) {
    match prior {
      Some((value, expiry)) => self.store.set_until(key, &value, expiry),
      None => self.store.remove(key),
    }
    info!(namespace = %self.store.namespace(), key, op = %kind, "rolled back cache after remote failure");
    self.notify(SyncEvent::RolledBack { kind, id });
  }

  /// Record a collection's id list, or hand it to whoever manages ids.
  /// A layer-level external flag overrides the collection's own preference.
  fn publish_ids(&self, collection: Option<&dyn Collection>, ids: Vec<Value>, incremental: bool) {
    let external = self.externally_managed_ids || collection.is_some_and(|c| c.manages_ids());
    if external {
      self.notify(SyncEvent::CollectionIds { ids, incremental });
    } else {
      self.store.set(IDS_KEY, &ids, None);
    }
  }

  fn cached_members(&self, ids: &[Value]) -> Vec<Attributes> {
    ids
      .iter()
      .filter_map(|id| {
        let mut attrs: Attributes = self.store.get(&id_key(id)?)?;
        attrs.insert(ID_ATTRIBUTE.to_string(), id.clone());
        Some(attrs)
      })
      .collect()
  }

  fn notify(&self, event: SyncEvent) {
    if let Some(events) = &self.events {
      // A dropped receiver just means nobody is listening.
      let _ = events.send(event);
    }
  }
}

impl Clone for SyncLayer {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      remote: Arc::clone(&self.remote),
      externally_managed_ids: self.externally_managed_ids,
      events: self.events.clone(),
    }
  }
}

fn rejected(error: SyncError) -> RemoteFuture {
  Box::pin(async move { Err::<Resolution, SyncError>(error) })
}

/// Cached fields whose value differs from one the entity currently holds.
/// Fields the entity doesn't have yet are not a conflict.
fn changed_fields(cached: &Attributes, entity: &dyn Entity) -> Attributes {
  cached
    .iter()
    .filter_map(|(name, value)| match entity.get(name) {
      Some(current) if current != *value => Some((name.clone(), value.clone())),
      _ => None,
    })
    .collect()
}

/// Drop null ids and duplicates, keeping first-seen order.
fn unique_ids<I: IntoIterator<Item = Value>>(ids: I) -> Vec<Value> {
  let mut unique: Vec<Value> = Vec::new();
  for id in ids {
    if !id.is_null() && !unique.contains(&id) {
      unique.push(id);
    }
  }
  unique
}
