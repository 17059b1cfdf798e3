//! Change tracker: tracked mutators and the raw property write.

use super::{DataContext, EntityKey, EntityRef};
use crate::change_feed::{ContextEvent, PropertyChange};
use crate::error::{CoreError, CoreResult};
use entictx_model::{EntityId, MetaProperty, ModelError, PropertyKind, PropertyValue, Value};
use std::sync::Arc;
use tracing::debug;

impl DataContext {
    /// Sets a scalar property.
    ///
    /// Setting the id property moves the entity to its new identity map key
    /// before anything else happens.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not managed, the property is not a
    /// writable scalar, or the new id is already taken by another entity.
    pub fn set_value(
        &mut self,
        h: EntityRef,
        property: &str,
        value: impl Into<Value>,
    ) -> CoreResult<PropertyChange> {
        self.apply(h, property, PropertyValue::Scalar(value.into()), true)
    }

    /// Sets a reference or embedded property.
    ///
    /// # Errors
    ///
    /// Returns an error if either entity is not managed, the property is not
    /// a writable reference, or the target has the wrong class.
    pub fn set_reference(
        &mut self,
        h: EntityRef,
        property: &str,
        target: Option<EntityRef>,
    ) -> CoreResult<PropertyChange> {
        self.apply(h, property, PropertyValue::Reference(target), true)
    }

    /// Replaces a collection property.
    ///
    /// # Errors
    ///
    /// See [`DataContext::set_reference`].
    pub fn set_collection(
        &mut self,
        h: EntityRef,
        property: &str,
        items: Vec<EntityRef>,
    ) -> CoreResult<PropertyChange> {
        self.apply(h, property, PropertyValue::Collection(items), true)
    }

    /// Appends to a loaded collection. Sets ignore items already present.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the collection is not
    /// loaded; see also [`DataContext::set_reference`].
    pub fn add_to_collection(
        &mut self,
        h: EntityRef,
        property: &str,
        item: EntityRef,
    ) -> CoreResult<PropertyChange> {
        self.update_collection(h, property, true, |items| {
            items.push(item);
            Ok(())
        })
    }

    /// Inserts into a loaded collection at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if `index` is past the end;
    /// see also [`DataContext::add_to_collection`].
    pub fn insert_into_collection(
        &mut self,
        h: EntityRef,
        property: &str,
        index: usize,
        item: EntityRef,
    ) -> CoreResult<PropertyChange> {
        self.update_collection(h, property, true, |items| {
            if index > items.len() {
                return Err(CoreError::illegal_argument(format!(
                    "index {index} out of bounds for {} items",
                    items.len()
                )));
            }
            items.insert(index, item);
            Ok(())
        })
    }

    /// Removes the first occurrence of `item` from a loaded collection.
    ///
    /// # Errors
    ///
    /// See [`DataContext::add_to_collection`].
    pub fn remove_from_collection(
        &mut self,
        h: EntityRef,
        property: &str,
        item: EntityRef,
    ) -> CoreResult<PropertyChange> {
        self.update_collection(h, property, true, |items| {
            if let Some(pos) = items.iter().position(|i| *i == item) {
                items.remove(pos);
            }
            Ok(())
        })
    }

    /// Empties a loaded collection.
    ///
    /// # Errors
    ///
    /// See [`DataContext::add_to_collection`].
    pub fn clear_collection(&mut self, h: EntityRef, property: &str) -> CoreResult<PropertyChange> {
        self.update_collection(h, property, true, |items| {
            items.clear();
            Ok(())
        })
    }

    pub(crate) fn update_collection(
        &mut self,
        h: EntityRef,
        property: &str,
        enforce_read_only: bool,
        f: impl FnOnce(&mut Vec<EntityRef>) -> CoreResult<()>,
    ) -> CoreResult<PropertyChange> {
        let entity = self.slot(h)?;
        let meta = entity.meta().require(property)?;
        if !matches!(meta.kind, PropertyKind::Collection { .. }) {
            return Err(ModelError::kind_mismatch(entity.class_name(), property, meta.expected()).into());
        }
        let mut items = entity
            .collection(property)
            .map(<[EntityRef]>::to_vec)
            .ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "{}.{property} is not loaded",
                    entity.class_name()
                ))
            })?;
        f(&mut items)?;
        self.apply(h, property, PropertyValue::Collection(items), enforce_read_only)
    }

    fn apply(
        &mut self,
        h: EntityRef,
        property: &str,
        value: PropertyValue<EntityRef>,
        enforce_read_only: bool,
    ) -> CoreResult<PropertyChange> {
        if !self.contains(h) {
            return Err(CoreError::UnknownEntity(h));
        }
        let entity = self.slot(h)?;
        let meta = entity.meta().require(property)?.clone();
        if enforce_read_only && meta.read_only {
            return Err(ModelError::ReadOnly {
                class: entity.class_name().to_string(),
                property: property.to_string(),
            }
            .into());
        }
        for target in value.refs() {
            self.check_target(&meta, *target)?;
        }

        let previous = self.write(h, property, value)?;
        let current = self
            .slot(h)?
            .get(property)
            .cloned()
            .ok_or(CoreError::UnknownEntity(h))?;
        let before: Vec<EntityRef> = previous.iter().flat_map(|p| p.refs().copied()).collect();
        let after: Vec<EntityRef> = current.refs().copied().collect();
        let change = PropertyChange {
            entity: h,
            property: property.to_string(),
            added: after.iter().filter(|r| !before.contains(r)).copied().collect(),
            removed: before.iter().filter(|r| !after.contains(r)).copied().collect(),
            previous,
            current,
        };
        if change.is_noop() {
            return Ok(change);
        }

        if matches!(meta.kind, PropertyKind::Embedded { .. }) {
            for old in &change.removed {
                if self.owners.get(old) == Some(&h) {
                    self.owners.remove(old);
                }
            }
            for new in &change.added {
                self.owners.insert(*new, h);
            }
        }
        if self.listeners_active() {
            self.mark_modified(h);
            self.feed.emit(ContextEvent::Changed(change.clone()));
        }
        Ok(change)
    }

    fn check_target(&self, meta: &MetaProperty, target: EntityRef) -> CoreResult<()> {
        let Some(expected) = meta.kind.target() else {
            return Ok(());
        };
        if !self.contains(target) {
            return Err(CoreError::UnknownEntity(target));
        }
        let actual = self.slot(target)?.class_name();
        if actual != expected {
            return Err(CoreError::illegal_argument(format!(
                "{} expects {expected}, got {actual} ({target})",
                meta.name
            )));
        }
        Ok(())
    }

    /// Writes a property without tracking it.
    ///
    /// Id writes rewrite the identity map key. This happens whether or not
    /// listeners are suspended, so lookups by id stay correct during merges.
    pub(crate) fn write(
        &mut self,
        h: EntityRef,
        property: &str,
        value: PropertyValue<EntityRef>,
    ) -> CoreResult<Option<PropertyValue<EntityRef>>> {
        let meta = Arc::clone(self.slot(h)?.meta());
        if !meta.is_id_property(property) {
            return Ok(self.slot_mut(h)?.set(property, value)?);
        }

        let old_key = self.key_of(h)?;
        let new_key = match &value {
            PropertyValue::Scalar(v) => match EntityId::from_value(v)? {
                Some(id) => EntityKey::persisted(meta.name(), id),
                None => EntityKey::Transient(h),
            },
            _ => old_key.clone(),
        };
        let rekey = new_key != old_key;
        if rekey {
            if let Some(&other) = self.keys.get(&new_key) {
                if other != h {
                    return Err(CoreError::illegal_argument(format!(
                        "{new_key:?} is already managed as {other}"
                    )));
                }
            }
        }

        let previous = self.slot_mut(h)?.set(property, value)?;
        if rekey && self.keys.get(&old_key) == Some(&h) {
            self.keys.remove(&old_key);
            debug!(entity = %h, from = ?old_key, to = ?new_key, "identity key rewritten");
            self.keys.insert(new_key, h);
        }
        Ok(previous)
    }
}
