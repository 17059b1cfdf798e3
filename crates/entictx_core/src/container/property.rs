//! Master-detail container bound to a collection property.

use super::collection::{check_index, CollectionContainer};
use super::CollectionChangeKind;
use crate::change_feed::PropertyChange;
use crate::context::{DataContext, EntityRef};
use crate::error::{CoreError, CoreResult};
use std::ops::Deref;

/// A collection container mirroring a collection property of a master
/// entity.
///
/// Reads go through the inner [`CollectionContainer`] (via `Deref`). Writes
/// go through [`PropertyContainer::set_items`] or
/// [`PropertyContainer::mutable_items`], which apply the change to the
/// master's property with the context's tracked mutators first, so the
/// master is marked modified and the container stays an exact mirror.
/// Changes made to the master elsewhere reach the container on
/// [`PropertyContainer::sync`].
#[derive(Debug)]
pub struct PropertyContainer {
    inner: CollectionContainer,
    property: String,
    master: Option<EntityRef>,
}

impl PropertyContainer {
    /// Creates an unbound container for `class` items held in `property`.
    pub fn new(class: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            inner: CollectionContainer::new(class),
            property: property.into(),
            master: None,
        }
    }

    /// Master collection property.
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Bound master entity.
    pub fn master(&self) -> Option<EntityRef> {
        self.master
    }

    /// Binds to a master entity and refreshes from its collection, or
    /// unbinds and clears the items.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] if the master is not managed,
    /// or [`CoreError::InvalidOperation`] if its collection is not loaded.
    pub fn bind(&mut self, ctx: &DataContext, master: Option<EntityRef>) -> CoreResult<()> {
        match master {
            Some(m) => {
                let items = master_items(ctx, m, &self.property)?;
                self.master = Some(m);
                self.inner.set_items(items);
            }
            None => {
                self.master = None;
                self.inner.set_items(Vec::new());
            }
        }
        Ok(())
    }

    /// Re-reads the master collection.
    ///
    /// # Errors
    ///
    /// See [`PropertyContainer::bind`].
    pub fn refresh(&mut self, ctx: &DataContext) -> CoreResult<()> {
        self.bind(ctx, self.master)
    }

    /// Picks up changes made to the master collection outside the container:
    /// tracked mutators, merges and reloads.
    ///
    /// Publishes the difference as one collection event and returns `true`
    /// if the items changed. A master that is no longer managed unbinds the
    /// container.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the master collection is
    /// no longer loaded.
    pub fn sync(&mut self, ctx: &DataContext) -> CoreResult<bool> {
        let Some(master) = self.master else {
            return Ok(false);
        };
        if !ctx.contains(master) {
            let had_items = !self.inner.is_empty();
            self.bind(ctx, None)?;
            return Ok(had_items);
        }
        let current = master_items(ctx, master, &self.property)?;
        let previous = self.inner.items();
        if current.as_slice() == previous {
            return Ok(false);
        }
        let added: Vec<EntityRef> = current
            .iter()
            .filter(|h| !previous.contains(h))
            .copied()
            .collect();
        let removed: Vec<EntityRef> = previous
            .iter()
            .filter(|h| !current.contains(h))
            .copied()
            .collect();
        let replaced = previous.len() == current.len()
            && previous.iter().zip(&current).filter(|(a, b)| a != b).count() == 1;
        let (kind, affected) = match (added.is_empty(), removed.is_empty()) {
            (false, true) => (CollectionChangeKind::AddItems, added),
            (true, false) => (CollectionChangeKind::RemoveItems, removed),
            (false, false) if replaced => (CollectionChangeKind::SetItem, added),
            _ => (CollectionChangeKind::Refresh, current.clone()),
        };
        self.inner.apply_items(current, kind, affected);
        Ok(true)
    }

    /// Replaces the master collection and the items.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the container is unbound,
    /// or any error of [`DataContext::set_collection`].
    pub fn set_items(
        &mut self,
        ctx: &mut DataContext,
        items: impl IntoIterator<Item = EntityRef>,
    ) -> CoreResult<()> {
        let master = self.bound()?;
        ctx.set_collection(master, &self.property, items.into_iter().collect())?;
        let current = master_items(ctx, master, &self.property)?;
        self.inner
            .apply_items(current.clone(), CollectionChangeKind::Refresh, current);
        Ok(())
    }

    /// Mutable view writing through to the master collection.
    pub fn mutable_items<'a>(&'a mut self, ctx: &'a mut DataContext) -> PropertyItems<'a> {
        PropertyItems {
            container: self,
            ctx,
        }
    }

    fn bound(&self) -> CoreResult<EntityRef> {
        self.master.ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "container for {} is not bound to a master",
                self.property
            ))
        })
    }
}

impl Deref for PropertyContainer {
    type Target = CollectionContainer;

    fn deref(&self) -> &CollectionContainer {
        &self.inner
    }
}

/// Mutable view of a [`PropertyContainer`] that writes through to the
/// master collection.
#[derive(Debug)]
pub struct PropertyItems<'a> {
    container: &'a mut PropertyContainer,
    ctx: &'a mut DataContext,
}

impl PropertyItems<'_> {
    /// Appends an item. Set properties ignore items already present.
    ///
    /// # Errors
    ///
    /// Returns any error of [`DataContext::add_to_collection`].
    pub fn push(&mut self, h: EntityRef) -> CoreResult<()> {
        let master = self.container.bound()?;
        let change = self
            .ctx
            .add_to_collection(master, &self.container.property, h)?;
        self.mirror(master, &change, CollectionChangeKind::AddItems)
    }

    /// Inserts an item at `index`.
    ///
    /// # Errors
    ///
    /// Returns any error of [`DataContext::insert_into_collection`].
    pub fn insert(&mut self, index: usize, h: EntityRef) -> CoreResult<()> {
        let master = self.container.bound()?;
        let change =
            self.ctx
                .insert_into_collection(master, &self.container.property, index, h)?;
        self.mirror(master, &change, CollectionChangeKind::AddItems)
    }

    /// Removes an item; returns `false` if absent.
    ///
    /// # Errors
    ///
    /// Returns any error of [`DataContext::remove_from_collection`].
    pub fn remove(&mut self, h: EntityRef) -> CoreResult<bool> {
        let master = self.container.bound()?;
        let change = self
            .ctx
            .remove_from_collection(master, &self.container.property, h)?;
        let removed = !change.is_noop();
        self.mirror(master, &change, CollectionChangeKind::RemoveItems)?;
        Ok(removed)
    }

    /// Removes the item at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if `index` is out of bounds.
    pub fn remove_at(&mut self, index: usize) -> CoreResult<EntityRef> {
        let master = self.container.bound()?;
        let mut remaining = master_items(self.ctx, master, &self.container.property)?;
        check_index(index, remaining.len())?;
        let h = remaining.remove(index);
        let change = self
            .ctx
            .set_collection(master, &self.container.property, remaining)?;
        self.mirror(master, &change, CollectionChangeKind::RemoveItems)?;
        Ok(h)
    }

    /// Replaces the item at `index`, returning the old one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if `index` is out of bounds.
    pub fn set(&mut self, index: usize, h: EntityRef) -> CoreResult<EntityRef> {
        let master = self.container.bound()?;
        let mut items = master_items(self.ctx, master, &self.container.property)?;
        check_index(index, items.len())?;
        let old = std::mem::replace(&mut items[index], h);
        let change = self
            .ctx
            .set_collection(master, &self.container.property, items)?;
        self.mirror(master, &change, CollectionChangeKind::SetItem)?;
        Ok(old)
    }

    /// Removes every item.
    ///
    /// # Errors
    ///
    /// Returns any error of [`DataContext::clear_collection`].
    pub fn clear(&mut self) -> CoreResult<()> {
        let master = self.container.bound()?;
        let change = self
            .ctx
            .clear_collection(master, &self.container.property)?;
        self.mirror(master, &change, CollectionChangeKind::RemoveItems)
    }

    fn mirror(
        &mut self,
        master: EntityRef,
        change: &PropertyChange,
        kind: CollectionChangeKind,
    ) -> CoreResult<()> {
        if change.is_noop() {
            return Ok(());
        }
        let items = master_items(self.ctx, master, &self.container.property)?;
        let affected = match kind {
            CollectionChangeKind::AddItems => change.added.clone(),
            CollectionChangeKind::RemoveItems => change.removed.clone(),
            CollectionChangeKind::SetItem => change.added.clone(),
            CollectionChangeKind::Refresh => items.clone(),
        };
        self.container.inner.apply_items(items, kind, affected);
        Ok(())
    }
}

fn master_items(ctx: &DataContext, master: EntityRef, property: &str) -> CoreResult<Vec<EntityRef>> {
    if !ctx.contains(master) {
        return Err(CoreError::UnknownEntity(master));
    }
    ctx.collection(master, property)
        .map(<[EntityRef]>::to_vec)
        .ok_or_else(|| {
            CoreError::invalid_operation(format!("collection {property} of {master} is not loaded"))
        })
}
