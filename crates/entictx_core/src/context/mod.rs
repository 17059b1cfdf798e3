//! The data context: identity map, merge engine, change tracker and commit
//! pipeline.
//!
//! A [`DataContext`] owns managed copies of entities in an arena. Handles
//! ([`EntityRef`]) are stable and never reused, so a handle that outlives
//! its entity simply stops resolving.

mod commit;
mod merge;
mod tracker;

pub use commit::CommitChanges;
pub use merge::MergeOptions;

use crate::change_feed::{ChangeFeed, ContextEvent, FeedEntry};
use crate::config::ContextConfig;
use crate::error::{CoreError, CoreResult};
use entictx_model::{instance_name, Entity, EntityId, InstanceId, Metadata, PropertyValue, Value};
use entictx_store::{DataManager, EntitySet, SaveContext};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::debug;

/// A data context shared with nested contexts.
pub type SharedDataContext = Arc<Mutex<DataContext>>;

type PreCommitHook = Box<dyn FnMut(&CommitChanges) -> bool + Send>;
type CommitDelegate = Box<dyn FnMut(SaveContext) -> CoreResult<EntitySet> + Send>;

/// Handle of a managed entity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityRef(u32);

impl EntityRef {
    /// Creates a handle from its raw index.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

fn handle_at(index: usize) -> CoreResult<EntityRef> {
    u32::try_from(index)
        .map(EntityRef)
        .map_err(|_| CoreError::invalid_operation("entity arena is full"))
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({})", self.0)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Identity map key.
///
/// Entities with an id are keyed by class and id. Entities without one are
/// keyed by their own handle until they receive an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// Entity with an id.
    Persisted {
        /// Entity class.
        class: String,
        /// Entity id.
        id: EntityId,
    },
    /// Entity without an id.
    Transient(EntityRef),
}

impl EntityKey {
    /// Creates a persisted key.
    pub fn persisted(class: impl Into<String>, id: EntityId) -> Self {
        Self::Persisted {
            class: class.into(),
            id,
        }
    }
}

/// Holds managed entities and tracks their changes.
///
/// At most one managed copy exists per class and id. Reads go through
/// accessors, writes through tracked mutators that return a
/// [`crate::PropertyChange`], mark the entity modified and publish a
/// [`ContextEvent`].
///
/// # Example
///
/// ```rust,ignore
/// let mut ctx = DataContext::new(metadata, ContextConfig::default())
///     .with_data_manager(dm);
/// let customer = ctx.create("Customer")?;
/// ctx.set_value(customer, "name", "Alice")?;
/// let committed = ctx.commit()?;
/// assert!(committed.contains(&customer));
/// ```
pub struct DataContext {
    metadata: Arc<Metadata>,
    config: ContextConfig,
    data_manager: Option<Arc<dyn DataManager>>,
    parent: Option<SharedDataContext>,
    /// Arena; `None` once evicted.
    entities: Vec<Option<Entity<EntityRef>>>,
    keys: HashMap<EntityKey, EntityRef>,
    instances: HashMap<InstanceId, EntityRef>,
    /// Embedded entity to the entity embedding it.
    owners: HashMap<EntityRef, EntityRef>,
    modified: BTreeSet<EntityRef>,
    removed: BTreeSet<EntityRef>,
    /// Entities sent to a commit without an id.
    pending: HashMap<InstanceId, EntityRef>,
    suspended: u32,
    feed: ChangeFeed<ContextEvent>,
    pre_commit: Vec<PreCommitHook>,
    commit_delegate: Option<CommitDelegate>,
}

impl DataContext {
    /// Creates an empty context.
    pub fn new(metadata: Arc<Metadata>, config: ContextConfig) -> Self {
        let feed = ChangeFeed::with_max_history(config.max_feed_history);
        Self {
            metadata,
            config,
            data_manager: None,
            parent: None,
            entities: Vec::new(),
            keys: HashMap::new(),
            instances: HashMap::new(),
            owners: HashMap::new(),
            modified: BTreeSet::new(),
            removed: BTreeSet::new(),
            pending: HashMap::new(),
            suspended: 0,
            feed,
            pre_commit: Vec::new(),
            commit_delegate: None,
        }
    }

    /// Creates a context committing into `parent` instead of storage.
    pub fn nested(parent: &SharedDataContext) -> Self {
        let (metadata, config, data_manager) = {
            let p = parent.lock();
            (
                Arc::clone(&p.metadata),
                p.config.clone(),
                p.data_manager.clone(),
            )
        };
        let mut ctx = Self::new(metadata, config);
        ctx.data_manager = data_manager;
        ctx.parent = Some(Arc::clone(parent));
        ctx
    }

    /// Sets the persistence facade used by top-level commits.
    #[must_use]
    pub fn with_data_manager(mut self, data_manager: Arc<dyn DataManager>) -> Self {
        self.data_manager = Some(data_manager);
        self
    }

    /// Sets the persistence facade used by top-level commits.
    pub fn set_data_manager(&mut self, data_manager: Arc<dyn DataManager>) {
        self.data_manager = Some(data_manager);
    }

    /// Persistence facade, if any.
    pub fn data_manager(&self) -> Option<&Arc<dyn DataManager>> {
        self.data_manager.as_ref()
    }

    /// Sets or clears the parent context.
    pub fn set_parent(&mut self, parent: Option<SharedDataContext>) {
        self.parent = parent;
    }

    /// Parent context, if this one is nested.
    pub fn parent(&self) -> Option<&SharedDataContext> {
        self.parent.as_ref()
    }

    /// Wraps the context for sharing with nested contexts.
    pub fn into_shared(self) -> SharedDataContext {
        Arc::new(Mutex::new(self))
    }

    /// Metadata of managed classes.
    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    /// Configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Creates a new managed entity of `class`.
    ///
    /// Every property is loaded and null or empty. The entity joins the
    /// modified set.
    ///
    /// # Errors
    ///
    /// Returns an error if the class is not registered.
    pub fn create(&mut self, class: &str) -> CoreResult<EntityRef> {
        let meta = Arc::clone(self.metadata.class(class)?);
        let h = self.alloc(Entity::new(meta))?;
        self.register(h)?;
        self.mark_modified(h);
        debug!(entity = %h, class, "entity created");
        self.feed.emit(ContextEvent::Created { entity: h });
        Ok(h)
    }

    /// Finds a managed entity by class and id.
    pub fn find(&self, class: &str, id: &EntityId) -> Option<EntityRef> {
        self.find_by_key(&EntityKey::persisted(class, id.clone()))
    }

    /// Finds a managed entity by identity map key.
    pub fn find_by_key(&self, key: &EntityKey) -> Option<EntityRef> {
        self.keys.get(key).copied()
    }

    /// Finds a managed entity by instance identity.
    pub fn find_instance(&self, instance: InstanceId) -> Option<EntityRef> {
        self.instances.get(&instance).copied()
    }

    /// Returns `true` if the handle denotes a managed entity.
    pub fn contains(&self, h: EntityRef) -> bool {
        self.entity(h)
            .is_some_and(|e| self.instances.get(&e.system().instance) == Some(&h))
    }

    /// Identity map key of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] for evicted handles.
    pub fn key_of(&self, h: EntityRef) -> CoreResult<EntityKey> {
        let entity = self.slot(h)?;
        Ok(match entity.id() {
            Some(id) => EntityKey::persisted(entity.class_name(), id),
            None => EntityKey::Transient(h),
        })
    }

    /// Entity record behind a handle.
    ///
    /// Removed entities stay readable until the next commit.
    pub fn entity(&self, h: EntityRef) -> Option<&Entity<EntityRef>> {
        self.entities.get(h.index()).and_then(Option::as_ref)
    }

    /// Iterates managed entities.
    pub fn entities(&self) -> impl Iterator<Item = (EntityRef, &Entity<EntityRef>)> {
        self.entities
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| Some((handle_at(i).ok()?, slot.as_ref()?)))
            .filter(|(h, e)| self.instances.get(&e.system().instance) == Some(h))
    }

    /// Number of managed entities.
    pub fn len(&self) -> usize {
        self.entities().count()
    }

    /// Returns `true` if nothing is managed.
    pub fn is_empty(&self) -> bool {
        self.entities().next().is_none()
    }

    /// Loaded scalar value of a property.
    pub fn value(&self, h: EntityRef, property: &str) -> Option<&Value> {
        self.entity(h)?.value(property)
    }

    /// Loaded, non-null reference.
    pub fn reference(&self, h: EntityRef, property: &str) -> Option<EntityRef> {
        self.entity(h)?.reference(property).copied()
    }

    /// Loaded collection.
    pub fn collection(&self, h: EntityRef, property: &str) -> Option<&[EntityRef]> {
        self.entity(h)?.collection(property)
    }

    /// Entity id.
    pub fn id_of(&self, h: EntityRef) -> Option<EntityId> {
        self.entity(h)?.id()
    }

    /// Rendered instance name.
    pub fn instance_name(&self, h: EntityRef) -> Option<String> {
        let entity = self.entity(h)?;
        Some(instance_name::render(entity, &|r: &EntityRef| self.entity(*r)))
    }

    /// Scalar value at a dotted reference path, e.g. `customer.address.city`.
    pub fn value_by_path(&self, h: EntityRef, path: &str) -> Option<&Value> {
        let mut current = h;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let entity = self.entity(current)?;
            if segments.peek().is_none() {
                return entity.value(segment);
            }
            current = *entity.reference(segment)?;
        }
        None
    }

    /// Returns `true` if the entity is in the modified set.
    pub fn is_modified(&self, h: EntityRef) -> bool {
        self.modified.contains(&h)
    }

    /// Returns `true` if the entity is in the removed set.
    pub fn is_removed(&self, h: EntityRef) -> bool {
        self.removed.contains(&h)
    }

    /// Returns `true` if anything is modified or removed.
    pub fn has_changes(&self) -> bool {
        !self.modified.is_empty() || !self.removed.is_empty()
    }

    /// Modified entities.
    pub fn modified(&self) -> &BTreeSet<EntityRef> {
        &self.modified
    }

    /// Removed entities.
    pub fn removed(&self) -> &BTreeSet<EntityRef> {
        &self.removed
    }

    /// Adds an entity to or takes it out of the modified set.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] if the entity is not managed.
    pub fn set_modified(&mut self, h: EntityRef, modified: bool) -> CoreResult<()> {
        if !self.contains(h) {
            return Err(CoreError::UnknownEntity(h));
        }
        if modified {
            self.modified.insert(h);
        } else {
            self.modified.remove(&h);
        }
        Ok(())
    }

    /// Stops recording modifications and publishing change events.
    ///
    /// Calls nest; each must be paired with [`DataContext::resume_listeners`].
    pub fn suspend_listeners(&mut self) {
        self.suspended += 1;
    }

    /// Undoes one [`DataContext::suspend_listeners`].
    pub fn resume_listeners(&mut self) {
        self.suspended = self.suspended.saturating_sub(1);
    }

    /// Returns `true` unless listeners are suspended.
    pub fn listeners_active(&self) -> bool {
        self.suspended == 0
    }

    /// Subscribes to context events.
    pub fn subscribe(&self) -> Receiver<FeedEntry<ContextEvent>> {
        self.feed.subscribe()
    }

    /// Polls recent events after `cursor`.
    pub fn poll_events(&self, cursor: u64, limit: usize) -> Vec<FeedEntry<ContextEvent>> {
        self.feed.poll(cursor, limit)
    }

    /// The context event feed.
    pub fn events(&self) -> &ChangeFeed<ContextEvent> {
        &self.feed
    }

    /// Removes an entity.
    ///
    /// The entity leaves the identity map and every managed collection
    /// holding it. It joins the removed set unless it was never saved and
    /// there is no parent to propagate the removal to.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] if the entity is not managed.
    pub fn remove(&mut self, h: EntityRef) -> CoreResult<()> {
        if !self.contains(h) {
            return Err(CoreError::UnknownEntity(h));
        }
        let holders: Vec<(EntityRef, String)> = self
            .entities()
            .flat_map(|(owner, e)| {
                e.loaded()
                    .filter(move |(_, v)| {
                        matches!(v, PropertyValue::Collection(items) if items.contains(&h))
                    })
                    .map(move |(name, _)| (owner, name.to_string()))
            })
            .collect();
        for (owner, property) in holders {
            self.update_collection(owner, &property, false, |items| {
                items.retain(|item| *item != h);
                Ok(())
            })?;
        }

        let discard = self.slot(h)?.is_new() && self.parent.is_none();
        self.unregister(h)?;
        self.modified.remove(&h);
        if discard {
            self.drop_slot(h);
        } else {
            self.removed.insert(h);
        }
        debug!(entity = %h, discard, "entity removed");
        self.feed.emit(ContextEvent::Removed { entity: h });
        Ok(())
    }

    /// Stops managing an entity without recording a change.
    ///
    /// Returns `false` if the handle was already evicted.
    pub fn evict(&mut self, h: EntityRef) -> bool {
        if self.entity(h).is_none() {
            return false;
        }
        let _ = self.unregister(h);
        self.modified.remove(&h);
        self.removed.remove(&h);
        self.drop_slot(h);
        self.feed.emit(ContextEvent::Evicted { entity: h });
        true
    }

    /// Evicts every modified and removed entity.
    pub fn evict_modified(&mut self) {
        let targets: Vec<EntityRef> = self.modified.union(&self.removed).copied().collect();
        for h in targets {
            self.evict(h);
        }
    }

    /// Evicts everything.
    pub fn clear(&mut self) {
        for slot in &mut self.entities {
            *slot = None;
        }
        self.keys.clear();
        self.instances.clear();
        self.owners.clear();
        self.modified.clear();
        self.removed.clear();
        self.pending.clear();
    }

    pub(crate) fn slot(&self, h: EntityRef) -> CoreResult<&Entity<EntityRef>> {
        self.entity(h).ok_or(CoreError::UnknownEntity(h))
    }

    pub(crate) fn slot_mut(&mut self, h: EntityRef) -> CoreResult<&mut Entity<EntityRef>> {
        self.entities
            .get_mut(h.index())
            .and_then(Option::as_mut)
            .ok_or(CoreError::UnknownEntity(h))
    }

    fn alloc(&mut self, entity: Entity<EntityRef>) -> CoreResult<EntityRef> {
        let h = handle_at(self.entities.len())?;
        self.entities.push(Some(entity));
        Ok(h)
    }

    fn drop_slot(&mut self, h: EntityRef) {
        if let Some(slot) = self.entities.get_mut(h.index()) {
            *slot = None;
        }
        self.owners.remove(&h);
    }

    fn register(&mut self, h: EntityRef) -> CoreResult<()> {
        let key = self.key_of(h)?;
        let instance = self.slot(h)?.system().instance;
        self.keys.insert(key, h);
        self.instances.entry(instance).or_insert(h);
        Ok(())
    }

    fn unregister(&mut self, h: EntityRef) -> CoreResult<()> {
        let key = self.key_of(h)?;
        let instance = self.slot(h)?.system().instance;
        if self.keys.get(&key) == Some(&h) {
            self.keys.remove(&key);
        }
        if self.instances.get(&instance) == Some(&h) {
            self.instances.remove(&instance);
        }
        Ok(())
    }

    /// Marks an entity and its embedding owners modified.
    pub(crate) fn mark_modified(&mut self, h: EntityRef) {
        let mut current = Some(h);
        let mut hops = 0;
        while let Some(entity) = current {
            self.modified.insert(entity);
            hops += 1;
            if hops > self.entities.len() {
                break;
            }
            current = self.owners.get(&entity).copied();
        }
    }
}

impl fmt::Debug for DataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataContext")
            .field("managed", &self.instances.len())
            .field("modified", &self.modified)
            .field("removed", &self.removed)
            .field("nested", &self.parent.is_some())
            .field("listeners_active", &self.listeners_active())
            .finish()
    }
}
