//! Entity records.
//!
//! An [`Entity`] is generic over the handle type `R` used for references:
//! detached graphs use [`crate::NodeId`], a data context uses its own arena
//! handles. The same record type therefore serves both sides of a merge.

use crate::error::{ModelError, ModelResult};
use crate::id::{EntityId, InstanceId};
use crate::meta::{CollectionKind, MetaClass, MetaProperty, PropertyKind};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Value held by a loaded property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue<R> {
    /// Scalar value.
    Scalar(Value),
    /// Reference or embedded entity, `None` when null.
    Reference(Option<R>),
    /// Collection of entities.
    Collection(Vec<R>),
}

impl<R> PropertyValue<R> {
    /// Default (null or empty) value for a property of the given kind.
    pub fn default_for(kind: &PropertyKind) -> Self {
        match kind {
            PropertyKind::Scalar { .. } => PropertyValue::Scalar(Value::Null),
            PropertyKind::Reference { .. } | PropertyKind::Embedded { .. } => {
                PropertyValue::Reference(None)
            }
            PropertyKind::Collection { .. } => PropertyValue::Collection(Vec::new()),
        }
    }

    /// Returns `true` for null scalars and null references.
    ///
    /// Collections are never null; an empty collection is a value.
    pub fn is_null(&self) -> bool {
        match self {
            PropertyValue::Scalar(v) => v.is_null(),
            PropertyValue::Reference(r) => r.is_none(),
            PropertyValue::Collection(_) => false,
        }
    }

    /// Translates every handle with `f`.
    pub fn map_refs<S>(&self, mut f: impl FnMut(&R) -> S) -> PropertyValue<S> {
        match self {
            PropertyValue::Scalar(v) => PropertyValue::Scalar(v.clone()),
            PropertyValue::Reference(r) => PropertyValue::Reference(r.as_ref().map(f)),
            PropertyValue::Collection(items) => {
                PropertyValue::Collection(items.iter().map(&mut f).collect())
            }
        }
    }

    /// Iterates the handles held by this value.
    pub fn refs(&self) -> impl Iterator<Item = &R> {
        let (one, many): (Option<&R>, &[R]) = match self {
            PropertyValue::Scalar(_) => (None, &[]),
            PropertyValue::Reference(r) => (r.as_ref(), &[]),
            PropertyValue::Collection(items) => (None, items.as_slice()),
        };
        one.into_iter().chain(many.iter())
    }

    fn fits(&self, property: &MetaProperty) -> bool {
        match (&property.kind, self) {
            (PropertyKind::Scalar { ty }, PropertyValue::Scalar(v)) => v.fits(*ty),
            (
                PropertyKind::Reference { .. } | PropertyKind::Embedded { .. },
                PropertyValue::Reference(_),
            )
            | (PropertyKind::Collection { .. }, PropertyValue::Collection(_)) => true,
            _ => false,
        }
    }
}

/// Persistence bookkeeping carried along with every entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// In-memory instance identity.
    pub instance: InstanceId,
    /// `true` until the entity has been saved once.
    pub new: bool,
    /// Optimistic lock version, `None` before the first save.
    pub version: Option<i64>,
    /// Soft deletion timestamp.
    pub deleted_at: Option<i64>,
    /// Who soft-deleted the entity.
    pub deleted_by: Option<String>,
    /// Extension attributes.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl SystemState {
    /// State of a freshly constructed entity.
    #[must_use]
    pub fn new_instance() -> Self {
        Self {
            instance: InstanceId::new(),
            new: true,
            version: None,
            deleted_at: None,
            deleted_by: None,
            extra: BTreeMap::new(),
        }
    }

    /// Returns `true` if the entity is soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new_instance()
    }
}

/// An entity record: class descriptor, loaded properties and system state.
///
/// A property missing from the record is *not loaded*, which is different
/// from a loaded property holding null.
#[derive(Debug, Clone)]
pub struct Entity<R> {
    meta: Arc<MetaClass>,
    values: BTreeMap<String, PropertyValue<R>>,
    system: SystemState,
}

impl<R: Clone + PartialEq> Entity<R> {
    /// Creates a new entity with every property loaded and null or empty.
    pub fn new(meta: Arc<MetaClass>) -> Self {
        let values = meta
            .properties()
            .iter()
            .map(|p| (p.name.clone(), PropertyValue::default_for(&p.kind)))
            .collect();
        Self {
            meta,
            values,
            system: SystemState::new_instance(),
        }
    }

    /// Creates an entity with nothing loaded and the given system state.
    pub fn unloaded(meta: Arc<MetaClass>, system: SystemState) -> Self {
        Self {
            meta,
            values: BTreeMap::new(),
            system,
        }
    }

    /// Class descriptor.
    pub fn meta(&self) -> &Arc<MetaClass> {
        &self.meta
    }

    /// Class name.
    pub fn class_name(&self) -> &str {
        self.meta.name()
    }

    /// System state.
    pub fn system(&self) -> &SystemState {
        &self.system
    }

    /// Mutable system state.
    pub fn system_mut(&mut self) -> &mut SystemState {
        &mut self.system
    }

    /// Returns `true` until the entity has been saved.
    pub fn is_new(&self) -> bool {
        self.system.new
    }

    /// Returns `true` if the property is loaded.
    pub fn is_loaded(&self, property: &str) -> bool {
        self.values.contains_key(property)
    }

    /// Iterates loaded properties.
    pub fn loaded(&self) -> impl Iterator<Item = (&str, &PropertyValue<R>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the loaded value of a property.
    pub fn get(&self, property: &str) -> Option<&PropertyValue<R>> {
        self.values.get(property)
    }

    /// Returns a loaded scalar value.
    pub fn value(&self, property: &str) -> Option<&Value> {
        match self.values.get(property) {
            Some(PropertyValue::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns a loaded, non-null reference.
    pub fn reference(&self, property: &str) -> Option<&R> {
        match self.values.get(property) {
            Some(PropertyValue::Reference(r)) => r.as_ref(),
            _ => None,
        }
    }

    /// Returns a loaded collection.
    pub fn collection(&self, property: &str) -> Option<&[R]> {
        match self.values.get(property) {
            Some(PropertyValue::Collection(items)) => Some(items),
            _ => None,
        }
    }

    /// Returns the entity id, `None` for new entities without one.
    pub fn id(&self) -> Option<EntityId> {
        let prop = self.meta.id_property()?;
        self.value(prop)
            .and_then(|v| EntityId::from_value(v).ok().flatten())
    }

    /// Writes a property, loading it if necessary.
    ///
    /// Set-backed collections are de-duplicated. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown properties, for values that do not match
    /// the property kind and for ids that are not valid identifiers.
    pub fn set(
        &mut self,
        property: &str,
        value: PropertyValue<R>,
    ) -> ModelResult<Option<PropertyValue<R>>> {
        let meta = self.meta.require(property)?;
        if !value.fits(meta) {
            return Err(ModelError::kind_mismatch(
                self.meta.name(),
                property,
                meta.expected(),
            ));
        }
        let value = match (value, meta.kind.collection_kind()) {
            (PropertyValue::Collection(items), Some(CollectionKind::Set)) => {
                PropertyValue::Collection(dedup(items))
            }
            (value, _) => value,
        };
        if self.meta.is_id_property(property) {
            if let PropertyValue::Scalar(v) = &value {
                EntityId::from_value(v)?;
            }
        }
        Ok(self.values.insert(property.to_string(), value))
    }

    /// Writes a scalar property.
    ///
    /// # Errors
    ///
    /// See [`Entity::set`].
    pub fn set_value(&mut self, property: &str, value: impl Into<Value>) -> ModelResult<()> {
        self.set(property, PropertyValue::Scalar(value.into()))
            .map(|_| ())
    }

    /// Writes a reference or embedded property.
    ///
    /// # Errors
    ///
    /// See [`Entity::set`].
    pub fn set_reference(&mut self, property: &str, target: Option<R>) -> ModelResult<()> {
        self.set(property, PropertyValue::Reference(target))
            .map(|_| ())
    }

    /// Writes a collection property.
    ///
    /// # Errors
    ///
    /// See [`Entity::set`].
    pub fn set_collection(&mut self, property: &str, items: Vec<R>) -> ModelResult<()> {
        self.set(property, PropertyValue::Collection(items))
            .map(|_| ())
    }

    /// Marks a property as not loaded, returning its last value.
    pub fn unload(&mut self, property: &str) -> Option<PropertyValue<R>> {
        self.values.remove(property)
    }

    /// Mutable access to a loaded collection.
    pub fn collection_mut(&mut self, property: &str) -> Option<&mut Vec<R>> {
        match self.values.get_mut(property) {
            Some(PropertyValue::Collection(items)) => Some(items),
            _ => None,
        }
    }

    /// Structural copy with every handle translated by `f`.
    pub fn map_refs<S: Clone + PartialEq>(&self, mut f: impl FnMut(&R) -> S) -> Entity<S> {
        Entity {
            meta: Arc::clone(&self.meta),
            values: self
                .values
                .iter()
                .map(|(k, v)| (k.clone(), v.map_refs(&mut f)))
                .collect(),
            system: self.system.clone(),
        }
    }
}

fn dedup<R: PartialEq>(items: Vec<R>) -> Vec<R> {
    let mut out: Vec<R> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{IdStrategy, Metadata};
    use crate::value::ScalarType;

    fn order_meta() -> Arc<MetaClass> {
        let meta = Metadata::builder()
            .class(
                MetaClass::builder("Order")
                    .id("id", IdStrategy::Sequence)
                    .scalar("number", ScalarType::Text)
                    .reference("customer", "Order")
                    .set("tags", "Order"),
            )
            .build()
            .unwrap();
        Arc::clone(meta.class("Order").unwrap())
    }

    #[test]
    fn new_entity_is_fully_loaded() {
        let e: Entity<u32> = Entity::new(order_meta());
        assert!(e.is_new());
        assert!(e.is_loaded("number"));
        assert!(e.is_loaded("tags"));
        assert_eq!(e.value("number"), Some(&Value::Null));
        assert_eq!(e.id(), None);
    }

    #[test]
    fn unloaded_entity() {
        let e: Entity<u32> = Entity::unloaded(order_meta(), SystemState::default());
        assert!(!e.is_loaded("number"));
        assert_eq!(e.loaded().count(), 0);
    }

    #[test]
    fn kind_is_checked() {
        let mut e: Entity<u32> = Entity::new(order_meta());
        assert!(e.set_value("number", "A-1").is_ok());
        assert!(matches!(
            e.set_value("number", 5),
            Err(ModelError::KindMismatch { .. })
        ));
        assert!(e.set_value("customer", "x").is_err());
        assert!(e.set_reference("customer", Some(3)).is_ok());
        assert!(matches!(
            e.set_value("missing", 1),
            Err(ModelError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn id_is_read_from_property() {
        let mut e: Entity<u32> = Entity::new(order_meta());
        e.set_value("id", 10).unwrap();
        assert_eq!(e.id(), Some(EntityId::Long(10)));
    }

    #[test]
    fn set_collections_are_deduplicated() {
        let mut e: Entity<u32> = Entity::new(order_meta());
        e.set_collection("tags", vec![1, 2, 1, 3]).unwrap();
        assert_eq!(e.collection("tags"), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn map_refs_translates_handles() {
        let mut e: Entity<u32> = Entity::new(order_meta());
        e.set_reference("customer", Some(1)).unwrap();
        e.set_collection("tags", vec![2, 3]).unwrap();
        let mapped: Entity<String> = e.map_refs(|r| format!("n{r}"));
        assert_eq!(mapped.reference("customer"), Some(&"n1".to_string()));
        assert_eq!(mapped.collection("tags").unwrap().len(), 2);
        assert_eq!(mapped.system().instance, e.system().instance);
    }

    #[test]
    fn refs_iterates_handles() {
        let v: PropertyValue<u32> = PropertyValue::Collection(vec![4, 5]);
        assert_eq!(v.refs().copied().collect::<Vec<_>>(), vec![4, 5]);
        let v: PropertyValue<u32> = PropertyValue::Reference(Some(9));
        assert_eq!(v.refs().copied().collect::<Vec<_>>(), vec![9]);
        assert!(!PropertyValue::<u32>::Collection(vec![]).is_null());
    }
}
