//! Merge engine: copies detached graphs into managed entities.

use super::{DataContext, EntityKey, EntityRef};
use crate::change_feed::ContextEvent;
use crate::error::{CoreError, CoreResult};
use entictx_model::{Entity, EntityGraph, InstanceId, NodeId, PropertyKind, PropertyValue};
use entictx_store::EntitySet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Options of a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// The graph is fresh from storage: null values overwrite managed values
    /// at every depth, not only on the roots.
    pub fresh: bool,
}

impl MergeOptions {
    /// Options for state just loaded or saved.
    #[must_use]
    pub const fn fresh() -> Self {
        Self { fresh: true }
    }
}

struct MergeSession<'g> {
    graph: &'g EntityGraph,
    options: MergeOptions,
    /// Nodes merged so far; repeated and cyclic references land here.
    visited: HashMap<NodeId, EntityRef>,
    created: Vec<EntityRef>,
}

impl DataContext {
    /// Merges a detached graph rooted at `root` and returns the managed copy
    /// of the root.
    ///
    /// Merging the same logical entity again updates the same managed copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph does not fit the metadata or if an id
    /// in the graph conflicts with a managed entity.
    pub fn merge(&mut self, graph: &EntityGraph, root: NodeId) -> CoreResult<EntityRef> {
        self.merge_with(graph, root, MergeOptions::default())
    }

    /// Merges with explicit options.
    ///
    /// # Errors
    ///
    /// See [`DataContext::merge`].
    pub fn merge_with(
        &mut self,
        graph: &EntityGraph,
        root: NodeId,
        options: MergeOptions,
    ) -> CoreResult<EntityRef> {
        self.merge_roots(graph, &[root], options)?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::invalid_operation("merge produced no root"))
    }

    /// Merges every root of a loaded set, in order.
    ///
    /// # Errors
    ///
    /// See [`DataContext::merge`].
    pub fn merge_all(&mut self, set: &EntitySet, options: MergeOptions) -> CoreResult<Vec<EntityRef>> {
        self.merge_roots(&set.graph, &set.roots, options)
    }

    /// Merges several roots in one session, so nodes shared between roots
    /// are resolved once.
    pub(crate) fn merge_roots(
        &mut self,
        graph: &EntityGraph,
        roots: &[NodeId],
        options: MergeOptions,
    ) -> CoreResult<Vec<EntityRef>> {
        let mut session = MergeSession {
            graph,
            options,
            visited: HashMap::new(),
            created: Vec::new(),
        };
        self.suspend_listeners();
        let merged: CoreResult<Vec<EntityRef>> = roots
            .iter()
            .map(|&root| self.merge_node(&mut session, root, true))
            .collect();
        self.resume_listeners();
        let merged = merged?;

        if self.config.merge_new_as_modified {
            for h in session.created {
                if self.slot(h)?.is_new() {
                    self.mark_modified(h);
                    self.feed.emit(ContextEvent::Created { entity: h });
                }
            }
        }
        Ok(merged)
    }

    fn merge_node<'g>(
        &mut self,
        session: &mut MergeSession<'g>,
        node: NodeId,
        root: bool,
    ) -> CoreResult<EntityRef> {
        if let Some(&h) = session.visited.get(&node) {
            return Ok(h);
        }
        let graph: &'g EntityGraph = session.graph;
        let src = graph.get(node)?;
        let (h, created) = match self.resolve(src) {
            Some(h) => (h, false),
            None => (self.adopt(src)?, true),
        };
        session.visited.insert(node, h);
        if created {
            session.created.push(h);
        }
        self.merge_state(session, src, h, root || created)?;
        Ok(h)
    }

    /// Finds the managed copy of a detached entity: by id first, then by
    /// instance identity as long as the ids do not disagree.
    fn resolve(&self, src: &Entity<NodeId>) -> Option<EntityRef> {
        let id = src.id();
        if let Some(id) = &id {
            let key = EntityKey::persisted(src.class_name(), id.clone());
            if let Some(h) = self.find_by_key(&key) {
                return Some(h);
            }
        }
        let h = self.find_instance(src.system().instance)?;
        let managed = self.entity(h)?;
        if managed.class_name() != src.class_name() {
            return None;
        }
        match (managed.id(), id) {
            (Some(mine), Some(theirs)) if mine != theirs => None,
            _ => Some(h),
        }
    }

    /// Creates an empty managed copy carrying the system state and id of
    /// `src`.
    ///
    /// The copy gets a fresh instance identity when another managed entity
    /// already owns the one of `src`.
    fn adopt(&mut self, src: &Entity<NodeId>) -> CoreResult<EntityRef> {
        let mut system = src.system().clone();
        if let Some(owner) = self.find_instance(system.instance) {
            system.instance = InstanceId::new();
            debug!(owner = %owner, class = src.class_name(), "instance identity taken, reassigned");
        }
        let mut entity = Entity::unloaded(Arc::clone(src.meta()), system);
        if let Some(id) = src.meta().id_property() {
            if let Some(PropertyValue::Scalar(value)) = src.get(id) {
                entity.set(id, PropertyValue::Scalar(value.clone()))?;
            }
        }
        let h = self.alloc(entity)?;
        self.register(h)?;
        debug!(entity = %h, class = src.class_name(), "managed instance created");
        Ok(h)
    }

    /// Copies loaded properties of `src` onto `h`, scalars first.
    ///
    /// Unless `receive_all` is set, properties not loaded on the managed
    /// copy are left alone and null values are skipped (fresh merges apply
    /// them). Collections are replaced when `receive_all` is set and
    /// augmented otherwise.
    fn merge_state<'g>(
        &mut self,
        session: &mut MergeSession<'g>,
        src: &'g Entity<NodeId>,
        h: EntityRef,
        receive_all: bool,
    ) -> CoreResult<()> {
        {
            let incoming = src.system();
            let system = self.slot_mut(h)?.system_mut();
            system.new = incoming.new;
            if incoming.version.is_some() {
                system.version = incoming.version;
            }
            system.deleted_at = incoming.deleted_at;
            system.deleted_by.clone_from(&incoming.deleted_by);
            for (k, v) in &incoming.extra {
                system.extra.insert(k.clone(), v.clone());
            }
        }

        let meta = Arc::clone(src.meta());
        for property in meta.scalar_properties().chain(meta.class_properties()) {
            let name = property.name.as_str();
            let Some(incoming) = src.get(name) else {
                continue;
            };
            if !receive_all && !self.slot(h)?.is_loaded(name) {
                trace!(entity = %h, property = name, "not loaded on managed copy, skipped");
                continue;
            }
            if !receive_all && incoming.is_null() && !session.options.fresh {
                trace!(entity = %h, property = name, "null on nested entity, skipped");
                continue;
            }

            let value = match incoming {
                PropertyValue::Scalar(v) => PropertyValue::Scalar(v.clone()),
                PropertyValue::Reference(None) => PropertyValue::Reference(None),
                PropertyValue::Reference(Some(node)) => {
                    let target = self.merge_node(session, *node, false)?;
                    if matches!(property.kind, PropertyKind::Embedded { .. }) {
                        self.owners.insert(target, h);
                    }
                    PropertyValue::Reference(Some(target))
                }
                PropertyValue::Collection(nodes) => {
                    let mut items = Vec::with_capacity(nodes.len());
                    for node in nodes {
                        items.push(self.merge_node(session, *node, false)?);
                    }
                    if !receive_all {
                        if let Some(existing) = self.slot(h)?.collection(name) {
                            let mut augmented = existing.to_vec();
                            for item in items {
                                if !augmented.contains(&item) {
                                    augmented.push(item);
                                }
                            }
                            items = augmented;
                        }
                    }
                    PropertyValue::Collection(items)
                }
            };
            if self.slot(h)?.get(name) != Some(&value) {
                self.write(h, name, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::context;
    use super::*;
    use entictx_model::{EntityId, Metadata, SystemState, Value};

    fn persisted(graph: &mut EntityGraph, metadata: &Metadata, class: &str, id: EntityId) -> NodeId {
        let meta = metadata.class(class).unwrap();
        let mut system = SystemState::new_instance();
        system.new = false;
        system.version = Some(1);
        let mut entity = Entity::unloaded(Arc::clone(meta), system);
        entity
            .set_value(meta.id_property().unwrap(), id.to_value())
            .unwrap();
        graph.add(entity).unwrap()
    }

    #[test]
    fn merge_is_idempotent() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());
        let id = EntityId::random();

        let mut first = EntityGraph::new();
        let n = persisted(&mut first, &metadata, "Customer", id.clone());
        first.get_mut(n).unwrap().set_value("name", "Alice").unwrap();
        let a = ctx.merge(&first, n).unwrap();

        let mut second = EntityGraph::new();
        let n = persisted(&mut second, &metadata, "Customer", id.clone());
        second.get_mut(n).unwrap().set_value("name", "Alicia").unwrap();
        let b = ctx.merge(&second, n).unwrap();

        assert_eq!(a, b);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.value(a, "name"), Some(&Value::text("Alicia")));
        assert!(!ctx.is_modified(a));
    }

    #[test]
    fn shared_instance_with_other_id_is_managed_separately() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());

        let mut graph = EntityGraph::new();
        let n = persisted(&mut graph, &metadata, "Customer", EntityId::random());
        let a = ctx.merge(&graph, n).unwrap();

        let other = EntityId::random();
        graph
            .get_mut(n)
            .unwrap()
            .set_value("id", other.to_value())
            .unwrap();
        let b = ctx.merge(&graph, n).unwrap();

        assert_ne!(a, b);
        assert!(ctx.contains(a));
        assert!(ctx.contains(b));
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.find("Customer", &other), Some(b));
        assert_ne!(
            ctx.entity(a).unwrap().system().instance,
            ctx.entity(b).unwrap().system().instance
        );
        ctx.set_value(b, "name", "Bob").unwrap();
        assert!(ctx.is_modified(b));
        assert!(!ctx.is_modified(a));
    }

    #[test]
    fn cycles_share_managed_instances() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());
        let mut graph = EntityGraph::new();
        let c = persisted(&mut graph, &metadata, "Customer", EntityId::random());
        let o = persisted(&mut graph, &metadata, "Order", EntityId::Long(1));
        graph.get_mut(c).unwrap().set_collection("orders", vec![o]).unwrap();
        graph.get_mut(o).unwrap().set_reference("customer", Some(c)).unwrap();

        let mc = ctx.merge(&graph, c).unwrap();
        let mo = ctx.collection(mc, "orders").unwrap()[0];
        assert_eq!(ctx.reference(mo, "customer"), Some(mc));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn nested_nulls_and_unloaded_are_skipped() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());
        let cid = EntityId::random();

        let mut graph = EntityGraph::new();
        let c = persisted(&mut graph, &metadata, "Customer", cid.clone());
        graph.get_mut(c).unwrap().set_value("name", "Alice").unwrap();
        graph.get_mut(c).unwrap().set_value("email", "a@example.com").unwrap();
        let mc = ctx.merge(&graph, c).unwrap();

        let mut graph = EntityGraph::new();
        let o = persisted(&mut graph, &metadata, "Order", EntityId::Long(1));
        let c = persisted(&mut graph, &metadata, "Customer", cid);
        graph.get_mut(c).unwrap().set_value("name", Value::Null).unwrap();
        graph.get_mut(c).unwrap().set_collection("orders", vec![o]).unwrap();
        graph.get_mut(o).unwrap().set_reference("customer", Some(c)).unwrap();
        let mo = ctx.merge(&graph, o).unwrap();

        assert_eq!(ctx.reference(mo, "customer"), Some(mc));
        assert_eq!(ctx.value(mc, "name"), Some(&Value::text("Alice")));
        assert!(!ctx.entity(mc).unwrap().is_loaded("orders"));
    }

    #[test]
    fn fresh_merge_applies_nested_nulls() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());
        let cid = EntityId::random();

        let mut graph = EntityGraph::new();
        let c = persisted(&mut graph, &metadata, "Customer", cid.clone());
        graph.get_mut(c).unwrap().set_value("name", "Alice").unwrap();
        let mc = ctx.merge(&graph, c).unwrap();

        let mut graph = EntityGraph::new();
        let o = persisted(&mut graph, &metadata, "Order", EntityId::Long(1));
        let c = persisted(&mut graph, &metadata, "Customer", cid);
        graph.get_mut(c).unwrap().set_value("name", Value::Null).unwrap();
        graph.get_mut(o).unwrap().set_reference("customer", Some(c)).unwrap();
        ctx.merge_with(&graph, o, MergeOptions::fresh()).unwrap();

        assert_eq!(ctx.value(mc, "name"), Some(&Value::Null));
    }

    #[test]
    fn root_nulls_propagate() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());
        let cid = EntityId::random();

        let mut graph = EntityGraph::new();
        let c = persisted(&mut graph, &metadata, "Customer", cid.clone());
        graph.get_mut(c).unwrap().set_value("name", "Alice").unwrap();
        let mc = ctx.merge(&graph, c).unwrap();

        graph.get_mut(c).unwrap().set_value("name", Value::Null).unwrap();
        ctx.merge(&graph, c).unwrap();
        assert_eq!(ctx.value(mc, "name"), Some(&Value::Null));
    }

    #[test]
    fn nested_collections_augment_root_collections_replace() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());
        let cid = EntityId::random();

        let mut graph = EntityGraph::new();
        let c = persisted(&mut graph, &metadata, "Customer", cid.clone());
        let o1 = persisted(&mut graph, &metadata, "Order", EntityId::Long(1));
        graph.get_mut(c).unwrap().set_collection("orders", vec![o1]).unwrap();
        let mc = ctx.merge(&graph, c).unwrap();
        let m1 = ctx.find("Order", &EntityId::Long(1)).unwrap();

        let mut graph = EntityGraph::new();
        let o2 = persisted(&mut graph, &metadata, "Order", EntityId::Long(2));
        let c = persisted(&mut graph, &metadata, "Customer", cid.clone());
        graph.get_mut(c).unwrap().set_collection("orders", vec![o2]).unwrap();
        graph.get_mut(o2).unwrap().set_reference("customer", Some(c)).unwrap();
        ctx.merge(&graph, o2).unwrap();
        let m2 = ctx.find("Order", &EntityId::Long(2)).unwrap();
        assert_eq!(ctx.collection(mc, "orders"), Some(&[m1, m2][..]));

        ctx.merge(&graph, c).unwrap();
        assert_eq!(ctx.collection(mc, "orders"), Some(&[m2][..]));
    }

    #[test]
    fn new_entities_join_modified_set() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());
        let rx = ctx.subscribe();
        let mut graph = EntityGraph::new();
        let n = graph.create(metadata.class("Customer").unwrap()).unwrap();

        let h = ctx.merge(&graph, n).unwrap();
        assert!(ctx.is_modified(h));
        assert_eq!(rx.try_recv().unwrap().event, ContextEvent::Created { entity: h });
        assert!(rx.try_recv().is_err());

        assert_eq!(ctx.merge(&graph, n).unwrap(), h);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn merge_does_not_mark_existing_modified() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());
        let mut graph = EntityGraph::new();
        let c = persisted(&mut graph, &metadata, "Customer", EntityId::random());
        graph.get_mut(c).unwrap().set_value("name", "A").unwrap();
        let mc = ctx.merge(&graph, c).unwrap();
        graph.get_mut(c).unwrap().set_value("name", "B").unwrap();
        ctx.merge(&graph, c).unwrap();
        assert!(!ctx.is_modified(mc));
        assert!(ctx.listeners_active());
    }

    #[test]
    fn id_less_entity_resolves_by_instance() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());
        let mut graph = EntityGraph::new();
        let n = graph.create(metadata.class("Customer").unwrap()).unwrap();
        let h = ctx.merge(&graph, n).unwrap();

        let id = EntityId::random();
        graph.get_mut(n).unwrap().set_value("id", id.to_value()).unwrap();
        graph.get_mut(n).unwrap().system_mut().new = false;
        assert_eq!(ctx.merge(&graph, n).unwrap(), h);
        assert_eq!(ctx.find("Customer", &id), Some(h));
        assert!(!ctx.entity(h).unwrap().is_new());
    }

    #[test]
    fn embedded_owner_recorded() {
        let mut ctx = context();
        let metadata = Arc::clone(ctx.metadata());
        let mut graph = EntityGraph::new();
        let c = persisted(&mut graph, &metadata, "Customer", EntityId::random());
        let mut address = Entity::unloaded(
            Arc::clone(metadata.class("Address").unwrap()),
            SystemState {
                new: false,
                ..SystemState::new_instance()
            },
        );
        address.set_value("city", "Rome").unwrap();
        let a = graph.add(address).unwrap();
        graph.get_mut(c).unwrap().set_reference("address", Some(a)).unwrap();

        let mc = ctx.merge(&graph, c).unwrap();
        let ma = ctx.reference(mc, "address").unwrap();
        ctx.set_value(ma, "city", "Milan").unwrap();
        assert!(ctx.is_modified(mc));
    }
}
