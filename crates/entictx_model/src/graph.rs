//! Detached entity graphs.

use crate::entity::Entity;
use crate::error::{ModelError, ModelResult};
use crate::id::{EntityId, InstanceId};
use crate::meta::MetaClass;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Handle of an entity inside an [`EntityGraph`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Handle of the node at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::TooManyNodes`] if `index` does not fit a handle.
    pub fn from_index(index: usize) -> ModelResult<Self> {
        u32::try_from(index)
            .map(Self)
            .map_err(|_| ModelError::TooManyNodes { len: index })
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// A detached entity graph.
///
/// Entities reference each other through [`NodeId`]s of the same graph, so
/// shared and cyclic references are plain handles. A graph is what flows
/// into a merge, what a commit hands to the persistence layer and what the
/// persistence layer hands back.
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    nodes: Vec<Entity<NodeId>>,
}

impl EntityGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::TooManyNodes`] once the graph is full.
    pub fn add(&mut self, entity: Entity<NodeId>) -> ModelResult<NodeId> {
        let id = NodeId::from_index(self.nodes.len())?;
        self.nodes.push(entity);
        Ok(id)
    }

    /// Adds a new, fully loaded entity of the given class.
    ///
    /// # Errors
    ///
    /// See [`EntityGraph::add`].
    pub fn create(&mut self, meta: &Arc<MetaClass>) -> ModelResult<NodeId> {
        self.add(Entity::new(Arc::clone(meta)))
    }

    /// Returns the entity behind a handle.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] for handles of another graph.
    pub fn get(&self, node: NodeId) -> ModelResult<&Entity<NodeId>> {
        self.nodes
            .get(node.index())
            .ok_or(ModelError::UnknownNode { node: node.0 })
    }

    /// Returns the entity behind a handle mutably.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownNode`] for handles of another graph.
    pub fn get_mut(&mut self, node: NodeId) -> ModelResult<&mut Entity<NodeId>> {
        self.nodes
            .get_mut(node.index())
            .ok_or(ModelError::UnknownNode { node: node.0 })
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no entities.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates all entities with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Entity<NodeId>)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, e)| Some((NodeId::from_index(i).ok()?, e)))
    }

    /// Finds an entity by class and id.
    pub fn find(&self, class: &str, id: &EntityId) -> Option<NodeId> {
        self.iter()
            .find(|(_, e)| e.class_name() == class && e.id().as_ref() == Some(id))
            .map(|(n, _)| n)
    }

    /// Finds an entity by instance identity.
    pub fn find_instance(&self, instance: InstanceId) -> Option<NodeId> {
        self.iter()
            .find(|(_, e)| e.system().instance == instance)
            .map(|(n, _)| n)
    }

    /// Returns every node reachable from `roots`, roots first.
    pub fn reachable(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            let Ok(entity) = self.get(node) else {
                continue;
            };
            order.push(node);
            let mut next: Vec<NodeId> = entity
                .loaded()
                .flat_map(|(_, v)| v.refs().copied())
                .collect();
            next.reverse();
            stack.extend(next);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{IdStrategy, Metadata};

    fn node_meta() -> Arc<MetaClass> {
        let meta = Metadata::builder()
            .class(
                MetaClass::builder("Node")
                    .id("id", IdStrategy::Sequence)
                    .reference("next", "Node")
                    .list("children", "Node"),
            )
            .build()
            .unwrap();
        Arc::clone(meta.class("Node").unwrap())
    }

    #[test]
    fn add_and_get() {
        let meta = node_meta();
        let mut graph = EntityGraph::new();
        let a = graph.create(&meta).unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.get(a).is_ok());
        assert!(graph.get(NodeId(5)).is_err());
    }

    #[test]
    fn node_handles_are_checked() {
        assert_eq!(NodeId::from_index(7), Ok(NodeId(7)));
        assert_eq!(NodeId::from_index(u32::MAX as usize), Ok(NodeId(u32::MAX)));
        let past = u32::MAX as usize + 1;
        assert_eq!(
            NodeId::from_index(past),
            Err(ModelError::TooManyNodes { len: past })
        );
    }

    #[test]
    fn reachable_handles_cycles() {
        let meta = node_meta();
        let mut graph = EntityGraph::new();
        let a = graph.create(&meta).unwrap();
        let b = graph.create(&meta).unwrap();
        let c = graph.create(&meta).unwrap();
        let _unreachable = graph.create(&meta).unwrap();
        graph.get_mut(a).unwrap().set_reference("next", Some(b)).unwrap();
        graph.get_mut(b).unwrap().set_reference("next", Some(a)).unwrap();
        graph
            .get_mut(b)
            .unwrap()
            .set_collection("children", vec![c, a])
            .unwrap();

        let nodes = graph.reachable(&[a]);
        assert_eq!(nodes, vec![a, b, c]);
    }

    #[test]
    fn find_by_id_and_instance() {
        let meta = node_meta();
        let mut graph = EntityGraph::new();
        let a = graph.create(&meta).unwrap();
        graph.get_mut(a).unwrap().set_value("id", 3).unwrap();
        assert_eq!(graph.find("Node", &EntityId::Long(3)), Some(a));
        assert_eq!(graph.find("Other", &EntityId::Long(3)), None);
        let instance = graph.get(a).unwrap().system().instance;
        assert_eq!(graph.find_instance(instance), Some(a));
    }
}
