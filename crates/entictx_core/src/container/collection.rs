//! Ordered collection container.

use super::{CollectionChangeKind, ContainerEvent};
use crate::change_feed::{ChangeFeed, FeedEntry};
use crate::context::{DataContext, EntityRef};
use crate::error::{CoreError, CoreResult};
use crate::sort::{EntityComparator, Sort};
use entictx_model::{EntityId, FetchPlan};
use std::collections::HashMap;
use std::sync::mpsc::Receiver;

/// Holds an ordered list of managed entities and an optional current item.
///
/// An index from handle to position is rebuilt after every structural
/// change, so membership and position lookups are constant time. The
/// current item is always one of the items; removing it clears it.
#[derive(Debug)]
pub struct CollectionContainer {
    class: String,
    fetch_plan: Option<FetchPlan>,
    items: Vec<EntityRef>,
    index: HashMap<EntityRef, usize>,
    item: Option<EntityRef>,
    feed: ChangeFeed<ContainerEvent>,
}

impl CollectionContainer {
    /// Creates an empty container for entities of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fetch_plan: None,
            items: Vec::new(),
            index: HashMap::new(),
            item: None,
            feed: ChangeFeed::new(),
        }
    }

    /// Sets the fetch plan describing what the items have loaded.
    #[must_use]
    pub fn with_fetch_plan(mut self, plan: FetchPlan) -> Self {
        self.fetch_plan = Some(plan);
        self
    }

    /// Entity class.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Fetch plan, if any.
    pub fn fetch_plan(&self) -> Option<&FetchPlan> {
        self.fetch_plan.as_ref()
    }

    /// Sets the fetch plan.
    pub fn set_fetch_plan(&mut self, plan: Option<FetchPlan>) {
        self.fetch_plan = plan;
    }

    /// Items in order.
    pub fn items(&self) -> &[EntityRef] {
        &self.items
    }

    /// Replaces all items, publishing a refresh.
    pub fn set_items(&mut self, items: impl IntoIterator<Item = EntityRef>) {
        self.items = items.into_iter().collect();
        let all = self.items.clone();
        self.changed(CollectionChangeKind::Refresh, all);
    }

    /// Mutable view whose operations keep the index and current item in sync.
    pub fn mutable_items(&mut self) -> MutableItems<'_> {
        MutableItems { container: self }
    }

    /// Current item.
    pub fn item(&self) -> Option<EntityRef> {
        self.item
    }

    /// Sets the current item.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if the item is not in the
    /// container.
    pub fn set_item(&mut self, item: Option<EntityRef>) -> CoreResult<()> {
        if let Some(h) = item {
            if !self.contains_item(h) {
                return Err(CoreError::illegal_argument(format!(
                    "{h} is not in the {} container",
                    self.class
                )));
            }
        }
        self.set_current(item);
        Ok(())
    }

    /// Returns the item if present.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if the item is not in the
    /// container.
    pub fn get_item(&self, h: EntityRef) -> CoreResult<EntityRef> {
        self.get_item_or_none(h).ok_or_else(|| {
            CoreError::illegal_argument(format!("{h} is not in the {} container", self.class))
        })
    }

    /// Returns the item if present.
    pub fn get_item_or_none(&self, h: EntityRef) -> Option<EntityRef> {
        self.contains_item(h).then_some(h)
    }

    /// Position of an item.
    pub fn item_index(&self, h: EntityRef) -> Option<usize> {
        self.index.get(&h).copied()
    }

    /// Returns `true` if the item is in the container.
    pub fn contains_item(&self, h: EntityRef) -> bool {
        self.index.contains_key(&h)
    }

    /// Finds an item by entity id.
    pub fn item_by_id(&self, ctx: &DataContext, id: &EntityId) -> Option<EntityRef> {
        self.items
            .iter()
            .copied()
            .find(|h| ctx.id_of(*h).as_ref() == Some(id))
    }

    /// Replaces the item with the same identity in place, or appends it.
    ///
    /// Identity is the handle itself, or an equal id on an entity of the
    /// same class. A replaced current item is replaced as well.
    pub fn replace_item(&mut self, ctx: &DataContext, h: EntityRef) {
        let position = self.item_index(h).or_else(|| {
            let id = ctx.id_of(h)?;
            let class = ctx.entity(h)?.class_name();
            self.items.iter().position(|other| {
                ctx.entity(*other)
                    .is_some_and(|e| e.class_name() == class && e.id().as_ref() == Some(&id))
            })
        });
        match position {
            Some(pos) => {
                let old = std::mem::replace(&mut self.items[pos], h);
                if self.item == Some(old) && old != h {
                    self.set_current(Some(h));
                }
                self.changed(CollectionChangeKind::SetItem, vec![h]);
            }
            None => {
                self.items.push(h);
                self.changed(CollectionChangeKind::AddItems, vec![h]);
            }
        }
    }

    /// Stable-sorts the items, publishing a refresh.
    pub fn sort(&mut self, ctx: &DataContext, sort: &Sort) {
        EntityComparator::new(ctx).sort(&mut self.items, sort);
        let all = self.items.clone();
        self.changed(CollectionChangeKind::Refresh, all);
    }

    /// Number of items.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if there are no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Subscribes to container events.
    pub fn subscribe(&self) -> Receiver<FeedEntry<ContainerEvent>> {
        self.feed.subscribe()
    }

    /// Polls recent events after `cursor`.
    pub fn poll_events(&self, cursor: u64, limit: usize) -> Vec<FeedEntry<ContainerEvent>> {
        self.feed.poll(cursor, limit)
    }

    /// Replaces the items without deriving the change kind.
    pub(crate) fn apply_items(
        &mut self,
        items: Vec<EntityRef>,
        kind: CollectionChangeKind,
        affected: Vec<EntityRef>,
    ) {
        self.items = items;
        self.changed(kind, affected);
    }

    fn set_current(&mut self, item: Option<EntityRef>) {
        let previous = std::mem::replace(&mut self.item, item);
        if previous != item {
            self.feed.emit(ContainerEvent::ItemChanged { previous, item });
        }
    }

    fn changed(&mut self, kind: CollectionChangeKind, items: Vec<EntityRef>) {
        self.index.clear();
        for (pos, h) in self.items.iter().enumerate() {
            self.index.entry(*h).or_insert(pos);
        }
        if self.item.is_some_and(|h| !self.index.contains_key(&h)) {
            self.set_current(None);
        }
        self.feed.emit(ContainerEvent::CollectionChanged { kind, items });
    }
}

/// Mutable view of a [`CollectionContainer`]'s items.
#[derive(Debug)]
pub struct MutableItems<'a> {
    container: &'a mut CollectionContainer,
}

impl MutableItems<'_> {
    /// Appends an item.
    pub fn push(&mut self, h: EntityRef) {
        self.container.items.push(h);
        self.container.changed(CollectionChangeKind::AddItems, vec![h]);
    }

    /// Appends several items.
    pub fn extend(&mut self, items: impl IntoIterator<Item = EntityRef>) {
        let added: Vec<EntityRef> = items.into_iter().collect();
        if added.is_empty() {
            return;
        }
        self.container.items.extend(added.iter().copied());
        self.container.changed(CollectionChangeKind::AddItems, added);
    }

    /// Inserts an item at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if `index` is past the end.
    pub fn insert(&mut self, index: usize, h: EntityRef) -> CoreResult<()> {
        check_index(index, self.container.items.len() + 1)?;
        self.container.items.insert(index, h);
        self.container.changed(CollectionChangeKind::AddItems, vec![h]);
        Ok(())
    }

    /// Removes the first occurrence of an item; returns `false` if absent.
    pub fn remove(&mut self, h: EntityRef) -> bool {
        match self.container.items.iter().position(|i| *i == h) {
            Some(pos) => {
                self.container.items.remove(pos);
                self.container.changed(CollectionChangeKind::RemoveItems, vec![h]);
                true
            }
            None => false,
        }
    }

    /// Removes the item at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if `index` is out of bounds.
    pub fn remove_at(&mut self, index: usize) -> CoreResult<EntityRef> {
        check_index(index, self.container.items.len())?;
        let h = self.container.items.remove(index);
        self.container.changed(CollectionChangeKind::RemoveItems, vec![h]);
        Ok(h)
    }

    /// Replaces the item at `index`, returning the old one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IllegalArgument`] if `index` is out of bounds.
    pub fn set(&mut self, index: usize, h: EntityRef) -> CoreResult<EntityRef> {
        check_index(index, self.container.items.len())?;
        let old = std::mem::replace(&mut self.container.items[index], h);
        self.container.changed(CollectionChangeKind::SetItem, vec![h]);
        Ok(old)
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        let removed = std::mem::take(&mut self.container.items);
        self.container.changed(CollectionChangeKind::RemoveItems, removed);
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.container.items.len()
    }

    /// Returns `true` if there are no items.
    pub fn is_empty(&self) -> bool {
        self.container.items.is_empty()
    }
}

pub(crate) fn check_index(index: usize, bound: usize) -> CoreResult<()> {
    if index < bound {
        Ok(())
    } else {
        Err(CoreError::illegal_argument(format!(
            "index {index} out of bounds for {bound}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::context;

    fn refs(n: u32) -> Vec<EntityRef> {
        (0..n).map(EntityRef::from_raw).collect()
    }

    fn kinds(container: &CollectionContainer) -> Vec<CollectionChangeKind> {
        container
            .poll_events(0, 100)
            .into_iter()
            .filter_map(|e| match e.event {
                ContainerEvent::CollectionChanged { kind, .. } => Some(kind),
                ContainerEvent::ItemChanged { .. } => None,
            })
            .collect()
    }

    #[test]
    fn index_tracks_mutations() {
        let r = refs(4);
        let mut container = CollectionContainer::new("Customer");
        container.set_items(r[..3].to_vec());
        assert_eq!(container.item_index(r[2]), Some(2));

        {
            let mut items = container.mutable_items();
            items.insert(0, r[3]).unwrap();
            assert!(items.remove(r[1]));
            assert!(!items.remove(r[1]));
        }
        assert_eq!(container.items(), &[r[3], r[0], r[2]]);
        assert_eq!(container.item_index(r[2]), Some(2));
        assert_eq!(container.item_index(r[3]), Some(0));
        assert!(!container.contains_item(r[1]));
        assert_eq!(container.size(), 3);
        assert_eq!(
            kinds(&container),
            vec![
                CollectionChangeKind::Refresh,
                CollectionChangeKind::AddItems,
                CollectionChangeKind::RemoveItems
            ]
        );
    }

    #[test]
    fn current_item_must_be_contained() {
        let r = refs(3);
        let mut container = CollectionContainer::new("Customer");
        container.set_items(r[..2].to_vec());

        assert!(container.set_item(Some(r[1])).is_ok());
        assert!(matches!(
            container.set_item(Some(r[2])),
            Err(CoreError::IllegalArgument { .. })
        ));
        assert_eq!(container.item(), Some(r[1]));
        assert!(container.get_item(r[2]).is_err());
        assert_eq!(container.get_item_or_none(r[0]), Some(r[0]));
    }

    #[test]
    fn removing_current_item_clears_it() {
        let r = refs(2);
        let mut container = CollectionContainer::new("Customer");
        container.set_items(r.clone());
        container.set_item(Some(r[0])).unwrap();
        let rx = container.subscribe();

        container.mutable_items().remove_at(0).unwrap();

        assert_eq!(container.item(), None);
        assert_eq!(
            rx.try_recv().unwrap().event,
            ContainerEvent::ItemChanged {
                previous: Some(r[0]),
                item: None
            }
        );

        container.set_items(Vec::new());
        assert!(container.is_empty());
    }

    #[test]
    fn index_bounds_are_checked() {
        let mut container = CollectionContainer::new("Customer");
        let mut items = container.mutable_items();
        assert!(items.insert(1, EntityRef::from_raw(0)).is_err());
        assert!(items.remove_at(0).is_err());
        assert!(items.set(0, EntityRef::from_raw(0)).is_err());
        items.push(EntityRef::from_raw(0));
        assert_eq!(items.set(0, EntityRef::from_raw(1)).unwrap(), EntityRef::from_raw(0));
        items.clear();
        assert!(items.is_empty());
    }

    #[test]
    fn replace_by_identity() {
        let parent = context().into_shared();
        let mut ctx = DataContext::nested(&parent);
        let uuid = uuid::Uuid::new_v4();
        let a = ctx.create("Customer").unwrap();
        let b = ctx.create("Customer").unwrap();
        ctx.set_value(a, "id", uuid).unwrap();

        let mut container = CollectionContainer::new("Customer");
        container.set_items([a, b]);
        container.set_item(Some(a)).unwrap();
        assert_eq!(container.item_by_id(&ctx, &EntityId::from(uuid)), Some(a));

        // A nested context keeps removed entities readable.
        ctx.remove(a).unwrap();
        let c = ctx.create("Customer").unwrap();
        ctx.set_value(c, "id", uuid).unwrap();

        container.replace_item(&ctx, c);
        assert_eq!(container.items(), &[c, b]);
        assert_eq!(container.item(), Some(c));
        assert_eq!(container.item_index(c), Some(0));

        let d = ctx.create("Customer").unwrap();
        container.replace_item(&ctx, d);
        assert_eq!(container.items(), &[c, b, d]);
    }

    #[test]
    fn sort_publishes_refresh() {
        let mut ctx = context();
        let bob = ctx.create("Customer").unwrap();
        ctx.set_value(bob, "name", "Bob").unwrap();
        let alice = ctx.create("Customer").unwrap();
        ctx.set_value(alice, "name", "Alice").unwrap();

        let mut container = CollectionContainer::new("Customer");
        container.set_items([bob, alice]);
        container.sort(&ctx, &Sort::asc("name"));

        assert_eq!(container.items(), &[alice, bob]);
        assert_eq!(container.item_index(bob), Some(1));
        assert_eq!(
            kinds(&container),
            vec![CollectionChangeKind::Refresh, CollectionChangeKind::Refresh]
        );
    }
}
