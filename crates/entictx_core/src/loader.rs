//! Loaders: fill containers from a data manager through a data context.
//!
//! Loaded graphs are merged fresh, so reloading refreshes managed entities
//! in place instead of duplicating them.

use crate::container::{CollectionContainer, InstanceContainer};
use crate::context::{DataContext, EntityRef, MergeOptions};
use crate::error::{CoreError, CoreResult};
use entictx_model::{EntityId, FetchPlan};
use entictx_store::{Condition, DataManager, Direction, LoadContext};
use tracing::debug;

type PreLoadHook = Box<dyn FnMut(&LoadContext) -> bool + Send>;
type PostLoadHook = Box<dyn FnMut(&[EntityRef]) + Send>;

/// Loads one entity by id into an [`InstanceContainer`].
pub struct InstanceLoader {
    class: String,
    entity_id: Option<EntityId>,
    fetch_plan: Option<FetchPlan>,
    pre_load: Vec<PreLoadHook>,
    post_load: Vec<PostLoadHook>,
}

impl InstanceLoader {
    /// Creates a loader for `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            entity_id: None,
            fetch_plan: None,
            pre_load: Vec::new(),
            post_load: Vec::new(),
        }
    }

    /// Sets the id to load.
    #[must_use]
    pub fn entity_id(mut self, id: impl Into<EntityId>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    /// Sets the fetch plan; the container's plan is used otherwise.
    #[must_use]
    pub fn fetch_plan(mut self, plan: FetchPlan) -> Self {
        self.fetch_plan = Some(plan);
        self
    }

    /// Changes the id to load.
    pub fn set_entity_id(&mut self, id: Option<EntityId>) {
        self.entity_id = id;
    }

    /// Registers a hook run before loading; returning `false` vetoes the load.
    pub fn on_pre_load(&mut self, hook: impl FnMut(&LoadContext) -> bool + Send + 'static) {
        self.pre_load.push(Box::new(hook));
    }

    /// Registers a hook run with the loaded entity.
    pub fn on_post_load(&mut self, hook: impl FnMut(&[EntityRef]) + Send + 'static) {
        self.post_load.push(Box::new(hook));
    }

    /// Loads the entity, merges it into `ctx` and makes it the container's
    /// item.
    ///
    /// Returns `None` if a pre-load hook vetoed the load.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if no id is set,
    /// [`CoreError::EntityNotFound`] if the data manager has no such entity,
    /// or any load and merge error.
    pub fn load(
        &mut self,
        dm: &dyn DataManager,
        ctx: &mut DataContext,
        container: &mut InstanceContainer,
    ) -> CoreResult<Option<EntityRef>> {
        let id = self.entity_id.clone().ok_or_else(|| {
            CoreError::invalid_operation(format!("no {} id to load", self.class))
        })?;
        let mut load_ctx = LoadContext::new(self.class.clone()).id(id.clone());
        load_ctx.fetch_plan = self
            .fetch_plan
            .clone()
            .or_else(|| container.fetch_plan().cloned());
        if !self.pre_load.iter_mut().all(|hook| hook(&load_ctx)) {
            debug!(class = %self.class, %id, "load vetoed");
            return Ok(None);
        }

        let set = dm.load(&load_ctx)?;
        let root = set.first().ok_or_else(|| CoreError::EntityNotFound {
            class: self.class.clone(),
            id,
        })?;
        let h = ctx.merge_with(&set.graph, root, MergeOptions::fresh())?;
        container.set_item(Some(h));
        for hook in &mut self.post_load {
            hook(&[h]);
        }
        Ok(Some(h))
    }
}

impl std::fmt::Debug for InstanceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLoader")
            .field("class", &self.class)
            .field("entity_id", &self.entity_id)
            .field("fetch_plan", &self.fetch_plan)
            .finish_non_exhaustive()
    }
}

/// Loads a query result into a [`CollectionContainer`].
pub struct CollectionLoader {
    class: String,
    conditions: Vec<Condition>,
    sort: Vec<(String, Direction)>,
    first_result: usize,
    max_results: Option<usize>,
    fetch_plan: Option<FetchPlan>,
    pre_load: Vec<PreLoadHook>,
    post_load: Vec<PostLoadHook>,
}

impl CollectionLoader {
    /// Creates a loader for every entity of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            conditions: Vec::new(),
            sort: Vec::new(),
            first_result: 0,
            max_results: None,
            fetch_plan: None,
            pre_load: Vec::new(),
            post_load: Vec::new(),
        }
    }

    /// Adds a filter condition.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Adds a sort criterion applied by the data manager.
    #[must_use]
    pub fn sort(mut self, property: impl Into<String>, direction: Direction) -> Self {
        self.sort.push((property.into(), direction));
        self
    }

    /// Skips leading results.
    #[must_use]
    pub const fn first_result(mut self, first: usize) -> Self {
        self.first_result = first;
        self
    }

    /// Limits the number of results.
    #[must_use]
    pub const fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Sets the fetch plan; the container's plan is used otherwise.
    #[must_use]
    pub fn fetch_plan(mut self, plan: FetchPlan) -> Self {
        self.fetch_plan = Some(plan);
        self
    }

    /// Registers a hook run before loading; returning `false` vetoes the load.
    pub fn on_pre_load(&mut self, hook: impl FnMut(&LoadContext) -> bool + Send + 'static) {
        self.pre_load.push(Box::new(hook));
    }

    /// Registers a hook run with the loaded entities.
    pub fn on_post_load(&mut self, hook: impl FnMut(&[EntityRef]) + Send + 'static) {
        self.post_load.push(Box::new(hook));
    }

    /// Loads the entities, merges them into `ctx` and replaces the
    /// container's items.
    ///
    /// Returns `None` and leaves the container untouched if a pre-load
    /// hook vetoed the load.
    ///
    /// # Errors
    ///
    /// Returns any load or merge error.
    pub fn load(
        &mut self,
        dm: &dyn DataManager,
        ctx: &mut DataContext,
        container: &mut CollectionContainer,
    ) -> CoreResult<Option<Vec<EntityRef>>> {
        let mut load_ctx = LoadContext::new(self.class.clone()).first_result(self.first_result);
        load_ctx.conditions = self.conditions.clone();
        load_ctx.sort = self.sort.clone();
        load_ctx.max_results = self.max_results;
        load_ctx.fetch_plan = self
            .fetch_plan
            .clone()
            .or_else(|| container.fetch_plan().cloned());
        if !self.pre_load.iter_mut().all(|hook| hook(&load_ctx)) {
            debug!(class = %self.class, "load vetoed");
            return Ok(None);
        }

        let set = dm.load(&load_ctx)?;
        let items = ctx.merge_all(&set, MergeOptions::fresh())?;
        debug!(class = %self.class, count = items.len(), "collection loaded");
        container.set_items(items.iter().copied());
        for hook in &mut self.post_load {
            hook(&items);
        }
        Ok(Some(items))
    }
}

impl std::fmt::Debug for CollectionLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionLoader")
            .field("class", &self.class)
            .field("conditions", &self.conditions)
            .field("sort", &self.sort)
            .field("first_result", &self.first_result)
            .field("max_results", &self.max_results)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{context, metadata};
    use entictx_model::Value;
    use entictx_store::InMemoryDataManager;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn seeded(names: &[&str]) -> (Arc<InMemoryDataManager>, Vec<EntityId>) {
        let dm = Arc::new(InMemoryDataManager::new(metadata()));
        let mut ctx = context().with_data_manager(dm.clone());
        let handles: Vec<EntityRef> = names
            .iter()
            .map(|name| {
                let c = ctx.create("Customer").unwrap();
                ctx.set_value(c, "name", *name).unwrap();
                c
            })
            .collect();
        ctx.commit().unwrap();
        let ids = handles.iter().map(|h| ctx.id_of(*h).unwrap()).collect();
        (dm, ids)
    }

    #[test]
    fn instance_loader_fills_container() {
        let (dm, ids) = seeded(&["Alice"]);
        let mut ctx = context();
        let mut container = InstanceContainer::new("Customer");
        let mut loader = InstanceLoader::new("Customer").entity_id(ids[0].clone());

        let h = loader.load(dm.as_ref(), &mut ctx, &mut container).unwrap();
        assert_eq!(container.item(), h);
        let h = h.unwrap();
        assert_eq!(ctx.value(h, "name"), Some(&Value::text("Alice")));
        assert!(!ctx.has_changes());

        // Reloading refreshes the same managed instance.
        let again = loader.load(dm.as_ref(), &mut ctx, &mut container).unwrap();
        assert_eq!(again, Some(h));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn instance_loader_reports_missing() {
        let (dm, _) = seeded(&[]);
        let mut ctx = context();
        let mut container = InstanceContainer::new("Customer");

        let mut unset = InstanceLoader::new("Customer");
        assert!(matches!(
            unset.load(dm.as_ref(), &mut ctx, &mut container),
            Err(CoreError::InvalidOperation { .. })
        ));

        let mut loader = InstanceLoader::new("Customer").entity_id(EntityId::random());
        assert!(matches!(
            loader.load(dm.as_ref(), &mut ctx, &mut container),
            Err(CoreError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn collection_loader_sorts_and_pages() {
        let (dm, _) = seeded(&["Carol", "Alice", "Bob"]);
        let mut ctx = context();
        let mut container = CollectionContainer::new("Customer");
        let mut loader = CollectionLoader::new("Customer")
            .sort("name", Direction::Asc)
            .max_results(2);

        let items = loader
            .load(dm.as_ref(), &mut ctx, &mut container)
            .unwrap()
            .unwrap();
        let names: Vec<&Value> = items.iter().map(|h| ctx.value(*h, "name").unwrap()).collect();
        assert_eq!(names, vec![&Value::text("Alice"), &Value::text("Bob")]);
        assert_eq!(container.items(), items.as_slice());
    }

    #[test]
    fn collection_loader_filters() {
        let (dm, _) = seeded(&["Alice", "Bob"]);
        let mut ctx = context();
        let mut container = CollectionContainer::new("Customer");
        let mut loader =
            CollectionLoader::new("Customer").condition(Condition::equal("name", "Bob"));

        let items = loader
            .load(dm.as_ref(), &mut ctx, &mut container)
            .unwrap()
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(ctx.value(items[0], "name"), Some(&Value::text("Bob")));
    }

    #[test]
    fn pre_load_veto_and_post_load() {
        let (dm, _) = seeded(&["Alice"]);
        let mut ctx = context();
        let mut container = CollectionContainer::new("Customer");
        let mut loader = CollectionLoader::new("Customer");
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        loader.on_post_load(move |items| *sink.lock() += items.len());

        let allow = Arc::new(Mutex::new(false));
        let gate = Arc::clone(&allow);
        loader.on_pre_load(move |_| *gate.lock());

        assert_eq!(loader.load(dm.as_ref(), &mut ctx, &mut container).unwrap(), None);
        assert!(container.is_empty());
        assert_eq!(*seen.lock(), 0);

        *allow.lock() = true;
        assert!(loader.load(dm.as_ref(), &mut ctx, &mut container).unwrap().is_some());
        assert_eq!(container.size(), 1);
        assert_eq!(*seen.lock(), 1);
    }
}
