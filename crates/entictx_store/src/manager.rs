//! Persistence facade contract.

use crate::error::StoreResult;
use entictx_model::{EntityGraph, EntityId, FetchPlan, NodeId, Value};
use std::collections::HashMap;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// Comparison operator of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    NotEq,
    /// Strictly greater.
    Greater,
    /// Strictly less.
    Less,
    /// Text contains, case-insensitive.
    Contains,
    /// Property is null; the condition value is ignored.
    IsNull,
}

/// A filter on one property of the loaded class.
///
/// Reference properties compare the id of the referenced entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Property name.
    pub property: String,
    /// Operator.
    pub operator: Operator,
    /// Operand.
    pub value: Value,
}

impl Condition {
    /// `property == value`
    pub fn equal(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(property, Operator::Eq, value)
    }

    /// `property contains value`, case-insensitive.
    pub fn contains(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(property, Operator::Contains, Value::Text(value.into()))
    }

    /// `property is null`
    pub fn is_null(property: impl Into<String>) -> Self {
        Self::new(property, Operator::IsNull, Value::Null)
    }

    /// Condition with an explicit operator.
    pub fn new(property: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            property: property.into(),
            operator,
            value: value.into(),
        }
    }
}

/// A load request.
#[derive(Debug, Clone)]
pub struct LoadContext {
    /// Class to load.
    pub class: String,
    /// Load a single entity by id.
    pub id: Option<EntityId>,
    /// Filters, all of which must hold.
    pub conditions: Vec<Condition>,
    /// Sort by scalar properties.
    pub sort: Vec<(String, Direction)>,
    /// Number of leading results to skip.
    pub first_result: usize,
    /// Maximum number of results, `None` for all.
    pub max_results: Option<usize>,
    /// Properties to load, `None` for the local plan.
    pub fetch_plan: Option<FetchPlan>,
    /// Hide soft-deleted entities.
    pub soft_deletion: bool,
}

impl LoadContext {
    /// Creates a request for every entity of a class.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id: None,
            conditions: Vec::new(),
            sort: Vec::new(),
            first_result: 0,
            max_results: None,
            fetch_plan: None,
            soft_deletion: true,
        }
    }

    /// Restricts the request to one id.
    #[must_use]
    pub fn id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Adds a filter.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Adds a sort key.
    #[must_use]
    pub fn sort(mut self, property: impl Into<String>, direction: Direction) -> Self {
        self.sort.push((property.into(), direction));
        self
    }

    /// Skips leading results.
    #[must_use]
    pub fn first_result(mut self, first: usize) -> Self {
        self.first_result = first;
        self
    }

    /// Limits the number of results.
    #[must_use]
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Sets the fetch plan.
    #[must_use]
    pub fn fetch_plan(mut self, plan: FetchPlan) -> Self {
        self.fetch_plan = Some(plan);
        self
    }

    /// Includes soft-deleted entities.
    #[must_use]
    pub fn include_deleted(mut self) -> Self {
        self.soft_deletion = false;
        self
    }
}

/// A save request: entities to save and remove, with per-entity plans for
/// the state to return.
#[derive(Debug, Clone, Default)]
pub struct SaveContext {
    /// Graph holding every entity of the request.
    pub graph: EntityGraph,
    /// Entities to insert or update.
    pub to_save: Vec<NodeId>,
    /// Entities to remove.
    pub to_remove: Vec<NodeId>,
    /// Plan of the state returned for a saved entity.
    pub fetch_plans: HashMap<NodeId, FetchPlan>,
    /// Return nothing instead of the saved state.
    pub discard_saved: bool,
}

impl SaveContext {
    /// Creates an empty request over a graph.
    pub fn new(graph: EntityGraph) -> Self {
        Self {
            graph,
            ..Self::default()
        }
    }

    /// Adds an entity to save.
    #[must_use]
    pub fn save(mut self, node: NodeId) -> Self {
        self.to_save.push(node);
        self
    }

    /// Adds an entity to remove.
    #[must_use]
    pub fn remove(mut self, node: NodeId) -> Self {
        self.to_remove.push(node);
        self
    }

    /// Sets the plan of the state returned for `node`.
    #[must_use]
    pub fn fetch_plan(mut self, node: NodeId, plan: FetchPlan) -> Self {
        self.fetch_plans.insert(node, plan);
        self
    }

    /// Returns `true` if nothing is to be saved or removed.
    pub fn is_empty(&self) -> bool {
        self.to_save.is_empty() && self.to_remove.is_empty()
    }
}

/// Result of a load or save: a graph and its ordered roots.
#[derive(Debug, Clone, Default)]
pub struct EntitySet {
    /// Graph holding the roots and everything they reference.
    pub graph: EntityGraph,
    /// Result entities in order.
    pub roots: Vec<NodeId>,
}

impl EntitySet {
    /// Number of result entities.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Returns `true` if there are no result entities.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// First result entity.
    pub fn first(&self) -> Option<NodeId> {
        self.roots.first().copied()
    }
}

/// The persistence facade.
///
/// Both calls are synchronous and opaque: the data context neither knows nor
/// cares how entities are stored.
pub trait DataManager: Send + Sync {
    /// Loads entities.
    ///
    /// # Errors
    ///
    /// Returns an error if the request does not match the metadata or the
    /// backing store fails.
    fn load(&self, ctx: &LoadContext) -> StoreResult<EntitySet>;

    /// Saves and removes entities atomically, returning the saved state.
    ///
    /// # Errors
    ///
    /// Returns an error if any entity fails validation or an optimistic lock
    /// check; nothing is written in that case.
    fn save(&self, ctx: SaveContext) -> StoreResult<EntitySet>;

    /// Loads one entity by id.
    ///
    /// # Errors
    ///
    /// See [`DataManager::load`].
    fn load_by_id(
        &self,
        class: &str,
        id: EntityId,
        plan: Option<FetchPlan>,
    ) -> StoreResult<EntitySet> {
        let mut ctx = LoadContext::new(class).id(id);
        ctx.fetch_plan = plan;
        self.load(&ctx)
    }
}
