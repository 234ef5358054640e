//! In-memory entity and collection implementations.
//!
//! Plain attribute bags used by the CLI and tests; applications plug in their
//! own types through the [`Entity`] and [`Collection`] traits.

use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use super::traits::{Attributes, Collection, Entity, ID_ATTRIBUTE};

/// An entity backed by a mutable attribute map.
#[derive(Default)]
pub struct Model {
  attributes: RwLock<Attributes>,
  collection: RwLock<Option<Weak<dyn Collection>>>,
}

impl Model {
  pub fn new(attributes: Attributes) -> Arc<Self> {
    Arc::new(Self {
      attributes: RwLock::new(attributes),
      collection: RwLock::new(None),
    })
  }

  /// Build a model from a JSON object. Non-object values yield an empty model.
  pub fn from_value(value: Value) -> Arc<Self> {
    match value {
      Value::Object(attributes) => Self::new(attributes),
      _ => Self::new(Attributes::new()),
    }
  }

  pub fn attributes(&self) -> Attributes {
    self
      .attributes
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn attach(&self, collection: Weak<dyn Collection>) {
    *self
      .collection
      .write()
      .unwrap_or_else(PoisonError::into_inner) = Some(collection);
  }
}

impl Entity for Model {
  fn get(&self, attr: &str) -> Option<Value> {
    self
      .attributes
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(attr)
      .cloned()
  }

  fn set(&self, attrs: &Attributes) {
    let mut attributes = self
      .attributes
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    for (name, value) in attrs {
      attributes.insert(name.clone(), value.clone());
    }
  }

  fn to_serializable(&self) -> Attributes {
    self.attributes()
  }

  fn collection(&self) -> Option<Arc<dyn Collection>> {
    self
      .collection
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .and_then(Weak::upgrade)
  }
}

impl std::fmt::Debug for Model {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Model")
      .field("attributes", &self.attributes())
      .finish_non_exhaustive()
  }
}

/// Ordered collection of [`Model`]s.
pub struct ModelCollection {
  this: Weak<ModelCollection>,
  members: RwLock<Vec<Arc<Model>>>,
  manages_ids: bool,
}

impl ModelCollection {
  pub fn new() -> Arc<Self> {
    Self::build(false)
  }

  /// A collection that tracks its cached id list itself.
  pub fn with_managed_ids() -> Arc<Self> {
    Self::build(true)
  }

  fn build(manages_ids: bool) -> Arc<Self> {
    Arc::new_cyclic(|this| Self {
      this: this.clone(),
      members: RwLock::new(Vec::new()),
      manages_ids,
    })
  }

  /// Append `model`, making this collection its owner.
  pub fn add(&self, model: Arc<Model>) {
    model.attach(self.this.clone());
    self
      .members
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push(model);
  }

  pub fn models(&self) -> Vec<Arc<Model>> {
    self
      .members
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn len(&self) -> usize {
    self
      .members
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn adopt(&self, attributes: &Attributes) -> Arc<Model> {
    let model = Model::new(attributes.clone());
    model.attach(self.this.clone());
    model
  }
}

impl Collection for ModelCollection {
  fn members(&self) -> Vec<Arc<dyn Entity>> {
    self
      .models()
      .into_iter()
      .map(|model| model as Arc<dyn Entity>)
      .collect()
  }

  fn reset(&self, members: &[Attributes]) {
    let models = members.iter().map(|attrs| self.adopt(attrs)).collect();
    *self
      .members
      .write()
      .unwrap_or_else(PoisonError::into_inner) = models;
  }

  fn incremental_update(&self, members: &[Attributes]) {
    let mut models = self
      .members
      .write()
      .unwrap_or_else(PoisonError::into_inner);

    for attrs in members {
      let id = attrs.get(ID_ATTRIBUTE).filter(|id| !id.is_null());
      let position =
        id.and_then(|id| models.iter().position(|m| m.get(ID_ATTRIBUTE).as_ref() == Some(id)));
      match position {
        Some(index) => models[index].set(attrs),
        None => models.push(self.adopt(attrs)),
      }
    }
  }

  fn manages_ids(&self) -> bool {
    self.manages_ids
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn attrs(value: Value) -> Attributes {
    match value {
      Value::Object(map) => map,
      _ => panic!("not an object"),
    }
  }

  #[test]
  fn test_model_merges_attributes() {
    let model = Model::from_value(json!({"id": "m1", "foo": "bar"}));
    model.set(&attrs(json!({"foo": "baz", "extra": 1})));

    assert_eq!(model.id(), Some(json!("m1")));
    assert_eq!(
      model.to_serializable(),
      attrs(json!({"id": "m1", "foo": "baz", "extra": 1}))
    );
  }

  #[test]
  fn test_model_without_id() {
    let model = Model::from_value(json!({"id": null, "foo": "bar"}));
    assert_eq!(model.id(), None);
    assert!(model.collection().is_none());
  }

  #[test]
  fn test_collection_back_reference() {
    let collection = ModelCollection::new();
    let model = Model::from_value(json!({"id": 1}));
    collection.add(model.clone());

    let owner = model.collection().unwrap();
    assert_eq!(owner.members().len(), 1);
  }

  #[test]
  fn test_reset_replaces_members() {
    let collection = ModelCollection::new();
    collection.add(Model::from_value(json!({"id": 1})));

    collection.reset(&[attrs(json!({"id": 2})), attrs(json!({"id": 3}))]);

    let ids: Vec<_> = collection.models().iter().filter_map(|m| m.id()).collect();
    assert_eq!(ids, vec![json!(2), json!(3)]);
    assert!(collection.models()[0].collection().is_some());
  }

  #[test]
  fn test_incremental_update_keeps_existing() {
    let collection = ModelCollection::new();
    collection.add(Model::from_value(json!({"id": 1, "foo": "old"})));
    collection.add(Model::from_value(json!({"id": 2})));

    collection.incremental_update(&[
      attrs(json!({"id": 1, "foo": "new"})),
      attrs(json!({"id": 3})),
    ]);

    let models = collection.models();
    assert_eq!(models.len(), 3);
    assert_eq!(models[0].get("foo"), Some(json!("new")));
    assert_eq!(models[2].id(), Some(json!(3)));
  }
}
