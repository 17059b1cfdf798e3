//! In-memory data manager.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::manager::{Condition, DataManager, Direction, EntitySet, LoadContext, Operator, SaveContext};
use entictx_model::{
    Entity, EntityGraph, EntityId, FetchPlan, IdStrategy, MetaClass, Metadata, ModelError,
    NodeId, PropertyKind, PropertyValue, SystemState, Value,
};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

type RowKey = (String, EntityId);

#[derive(Debug, Clone)]
enum Cell {
    Value(Value),
    Ref(Option<RowKey>),
    Refs(Vec<RowKey>),
    Embedded(Option<Box<Row>>),
}

#[derive(Debug, Clone)]
struct Row {
    meta: Arc<MetaClass>,
    cells: BTreeMap<String, Cell>,
    system: SystemState,
}

#[derive(Debug, Default)]
struct StoreState {
    rows: BTreeMap<RowKey, Row>,
    sequences: HashMap<String, i64>,
    saves: u64,
    fail_next: Option<String>,
}

/// A [`DataManager`] keeping rows in memory.
///
/// Suitable for tests and for applications that stage data without a real
/// database. Rows are keyed by class and id; references between rows are
/// stored as keys, embedded values inline.
///
/// Behavior on save:
/// - new entities without an id get one according to the class
///   [`IdStrategy`]
/// - versions start at 1 and are incremented on every save; a stale version
///   fails the whole batch with [`StoreError::OptimisticLock`]
/// - soft-delete classes are marked deleted instead of being removed
/// - the returned state is projected on the per-entity fetch plan, or the
///   local plan, and keeps the instance identity of the saved entity
///
/// # Example
///
/// ```rust,ignore
/// let dm = InMemoryDataManager::new(metadata);
/// let saved = dm.save(SaveContext::new(graph).save(node))?;
/// let loaded = dm.load(&LoadContext::new("Customer"))?;
/// ```
#[derive(Debug)]
pub struct InMemoryDataManager {
    metadata: Arc<Metadata>,
    config: StoreConfig,
    state: RwLock<StoreState>,
}

impl InMemoryDataManager {
    /// Creates an empty store with default configuration.
    #[must_use]
    pub fn new(metadata: Arc<Metadata>) -> Self {
        Self::with_config(metadata, StoreConfig::default())
    }

    /// Creates an empty store.
    #[must_use]
    pub fn with_config(metadata: Arc<Metadata>, config: StoreConfig) -> Self {
        Self {
            metadata,
            config,
            state: RwLock::new(StoreState::default()),
        }
    }

    /// Metadata the store validates against.
    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    /// Number of stored rows, soft-deleted ones included.
    pub fn row_count(&self) -> usize {
        self.state.read().rows.len()
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> u64 {
        self.state.read().saves
    }

    /// Returns `true` if a row exists for the key.
    pub fn contains(&self, class: &str, id: &EntityId) -> bool {
        self.state
            .read()
            .rows
            .contains_key(&(class.to_string(), id.clone()))
    }

    /// Stored version of a row.
    pub fn version_of(&self, class: &str, id: &EntityId) -> Option<i64> {
        self.state
            .read()
            .rows
            .get(&(class.to_string(), id.clone()))
            .and_then(|row| row.system.version)
    }

    /// Returns `true` if the row is soft-deleted.
    pub fn is_deleted(&self, class: &str, id: &EntityId) -> bool {
        self.state
            .read()
            .rows
            .get(&(class.to_string(), id.clone()))
            .is_some_and(|row| row.system.is_deleted())
    }

    /// Makes the next `save` fail with [`StoreError::Failed`].
    pub fn fail_next_save(&self, message: impl Into<String>) {
        self.state.write().fail_next = Some(message.into());
    }

    fn generate_id(&self, state: &mut StoreState, meta: &MetaClass) -> StoreResult<EntityId> {
        match meta.id_strategy() {
            IdStrategy::Uuid => Ok(EntityId::random()),
            IdStrategy::Sequence => {
                let next = state
                    .sequences
                    .entry(meta.name().to_string())
                    .or_insert(self.config.start_sequence - 1);
                *next += 1;
                Ok(EntityId::Long(*next))
            }
            IdStrategy::Assigned => Err(StoreError::invalid_operation(format!(
                "{} requires an assigned id",
                meta.name()
            ))),
        }
    }

    fn key_of(graph: &EntityGraph, keys: &HashMap<NodeId, RowKey>, node: NodeId) -> StoreResult<RowKey> {
        if let Some(key) = keys.get(&node) {
            return Ok(key.clone());
        }
        let entity = graph.get(node)?;
        entity
            .id()
            .map(|id| (entity.class_name().to_string(), id))
            .ok_or_else(|| {
                StoreError::invalid_operation(format!(
                    "reference to an unsaved {} that is not part of the batch",
                    entity.class_name()
                ))
            })
    }

    fn write_cells(
        graph: &EntityGraph,
        keys: &HashMap<NodeId, RowKey>,
        entity: &Entity<NodeId>,
        row: &mut Row,
    ) -> StoreResult<()> {
        let meta = entity.meta();
        for (name, value) in entity.loaded() {
            let property = meta.require(name)?;
            let cell = match (&property.kind, value) {
                (PropertyKind::Scalar { .. }, PropertyValue::Scalar(v)) => Cell::Value(v.clone()),
                (PropertyKind::Embedded { .. }, PropertyValue::Reference(r)) => match r {
                    Some(node) => {
                        let embedded = graph.get(*node)?;
                        let mut inner = Row {
                            meta: Arc::clone(embedded.meta()),
                            cells: BTreeMap::new(),
                            system: SystemState {
                                new: false,
                                ..embedded.system().clone()
                            },
                        };
                        Self::write_cells(graph, keys, embedded, &mut inner)?;
                        Cell::Embedded(Some(Box::new(inner)))
                    }
                    None => Cell::Embedded(None),
                },
                (PropertyKind::Reference { .. }, PropertyValue::Reference(r)) => Cell::Ref(
                    r.map(|node| Self::key_of(graph, keys, node)).transpose()?,
                ),
                (PropertyKind::Collection { .. }, PropertyValue::Collection(items)) => Cell::Refs(
                    items
                        .iter()
                        .map(|node| Self::key_of(graph, keys, *node))
                        .collect::<StoreResult<_>>()?,
                ),
                _ => {
                    return Err(
                        ModelError::kind_mismatch(meta.name(), name, property.expected()).into(),
                    )
                }
            };
            row.cells.insert(name.to_string(), cell);
        }
        Ok(())
    }

    fn check_mandatory(entity: &Entity<NodeId>) -> StoreResult<()> {
        for property in entity.meta().properties().iter().filter(|p| p.mandatory) {
            if entity.get(&property.name).is_some_and(PropertyValue::is_null) {
                return Err(StoreError::MandatoryMissing {
                    class: entity.class_name().to_string(),
                    property: property.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_version(key: &RowKey, sent: Option<i64>, stored: Option<i64>) -> StoreResult<()> {
        match (sent, stored) {
            (Some(expected), Some(actual)) if expected != actual => Err(StoreError::OptimisticLock {
                class: key.0.clone(),
                id: key.1.clone(),
                expected,
                actual,
            }),
            _ => Ok(()),
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

fn cell_value(row: &Row, property: &str) -> Value {
    match row.cells.get(property) {
        Some(Cell::Value(v)) => v.clone(),
        Some(Cell::Ref(Some(key))) => key.1.to_value(),
        _ => Value::Null,
    }
}

fn matches(row: &Row, condition: &Condition) -> bool {
    let value = cell_value(row, &condition.property);
    match condition.operator {
        Operator::Eq => value == condition.value,
        Operator::NotEq => value != condition.value,
        Operator::Greater => value.natural_cmp(&condition.value) == Some(Ordering::Greater),
        Operator::Less => value.natural_cmp(&condition.value) == Some(Ordering::Less),
        Operator::Contains => match (value.as_text(), condition.value.as_text()) {
            (Some(haystack), Some(needle)) => haystack
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            _ => false,
        },
        Operator::IsNull => value.is_null(),
    }
}

fn compare_rows(a: &Row, b: &Row, sort: &[(String, Direction)]) -> Ordering {
    for (property, direction) in sort {
        let (x, y) = (cell_value(a, property), cell_value(b, property));
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => x.natural_cmp(&y).unwrap_or(Ordering::Equal),
        };
        let ord = match direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Builds a detached graph out of stored rows, one node per row.
struct Projector<'a> {
    rows: &'a BTreeMap<RowKey, Row>,
    graph: EntityGraph,
    seen: HashMap<RowKey, NodeId>,
}

impl<'a> Projector<'a> {
    fn new(rows: &'a BTreeMap<RowKey, Row>) -> Self {
        Self {
            rows,
            graph: EntityGraph::new(),
            seen: HashMap::new(),
        }
    }

    /// Projects a row; `None` for dangling keys.
    ///
    /// A row reached twice maps to one node. Recursion follows the plan
    /// tree, not the data, so cyclic data terminates.
    fn project(&mut self, key: &RowKey, plan: Option<&FetchPlan>) -> StoreResult<Option<NodeId>> {
        let rows = self.rows;
        let Some(row) = rows.get(key) else {
            return Ok(None);
        };
        let node = match self.seen.get(key) {
            Some(&node) => node,
            None => {
                let mut entity = Entity::unloaded(Arc::clone(&row.meta), row.system.clone());
                if let Some(id) = row.meta.id_property() {
                    entity.set_value(id, key.1.to_value())?;
                }
                let node = self.graph.add(entity)?;
                self.seen.insert(key.clone(), node);
                node
            }
        };
        let Some(plan) = plan else {
            return Ok(Some(node));
        };
        for (name, nested) in &plan.properties {
            let Some(cell) = row.cells.get(name) else {
                continue;
            };
            let value = self.cell(cell, nested.as_ref())?;
            self.graph.get_mut(node)?.set(name, value)?;
        }
        Ok(Some(node))
    }

    fn cell(&mut self, cell: &Cell, nested: Option<&FetchPlan>) -> StoreResult<PropertyValue<NodeId>> {
        Ok(match cell {
            Cell::Value(v) => PropertyValue::Scalar(v.clone()),
            Cell::Ref(None) | Cell::Embedded(None) => PropertyValue::Reference(None),
            Cell::Ref(Some(key)) => PropertyValue::Reference(self.project(key, nested)?),
            Cell::Refs(keys) => {
                let mut items = Vec::with_capacity(keys.len());
                for key in keys {
                    if let Some(node) = self.project(key, nested)? {
                        items.push(node);
                    }
                }
                PropertyValue::Collection(items)
            }
            Cell::Embedded(Some(row)) => PropertyValue::Reference(Some(self.embedded(row)?)),
        })
    }

    fn embedded(&mut self, row: &Row) -> StoreResult<NodeId> {
        let mut entity = Entity::unloaded(Arc::clone(&row.meta), row.system.clone());
        for (name, cell) in &row.cells {
            let value = self.cell(cell, None)?;
            entity.set(name, value)?;
        }
        Ok(self.graph.add(entity)?)
    }

    fn finish(self) -> EntityGraph {
        self.graph
    }
}

impl DataManager for InMemoryDataManager {
    fn load(&self, ctx: &LoadContext) -> StoreResult<EntitySet> {
        let state = self.state.read();
        let meta = self.metadata.class(&ctx.class)?;
        let local;
        let plan = match &ctx.fetch_plan {
            Some(plan) if plan.class != ctx.class => {
                return Err(StoreError::invalid_operation(format!(
                    "fetch plan for {} used to load {}",
                    plan.class, ctx.class
                )))
            }
            Some(plan) => plan,
            None => {
                local = FetchPlan::local(meta);
                &local
            }
        };

        let mut keys: Vec<&RowKey> = match &ctx.id {
            Some(id) => state
                .rows
                .get_key_value(&(ctx.class.clone(), id.clone()))
                .map(|(k, _)| k)
                .into_iter()
                .collect(),
            None => state.rows.keys().filter(|k| k.0 == ctx.class).collect(),
        };
        keys.retain(|key| {
            let row = &state.rows[*key];
            (!ctx.soft_deletion || !row.system.is_deleted())
                && ctx.conditions.iter().all(|c| matches(row, c))
        });
        if !ctx.sort.is_empty() {
            keys.sort_by(|a, b| compare_rows(&state.rows[*a], &state.rows[*b], &ctx.sort));
        }

        let mut projector = Projector::new(&state.rows);
        let mut roots = Vec::new();
        for key in keys
            .into_iter()
            .skip(ctx.first_result)
            .take(ctx.max_results.unwrap_or(usize::MAX))
        {
            if let Some(node) = projector.project(key, Some(plan))? {
                roots.push(node);
            }
        }
        debug!(class = %ctx.class, count = roots.len(), "load");
        Ok(EntitySet {
            graph: projector.finish(),
            roots,
        })
    }

    fn save(&self, ctx: SaveContext) -> StoreResult<EntitySet> {
        let mut state = self.state.write();
        if let Some(message) = state.fail_next.take() {
            return Err(StoreError::failed(message));
        }
        let graph = &ctx.graph;

        let mut keys: HashMap<NodeId, RowKey> = HashMap::with_capacity(ctx.to_save.len());
        for &node in &ctx.to_save {
            let entity = graph.get(node)?;
            let meta = entity.meta();
            if meta.is_embeddable() {
                return Err(StoreError::invalid_operation(format!(
                    "embeddable {} cannot be saved on its own",
                    meta.name()
                )));
            }
            let id = match entity.id() {
                Some(id) => id,
                None => self.generate_id(&mut state, meta)?,
            };
            keys.insert(node, (meta.name().to_string(), id));
        }

        for &node in &ctx.to_save {
            let entity = graph.get(node)?;
            let key = &keys[&node];
            Self::check_mandatory(entity)?;
            if let Some(row) = state.rows.get(key) {
                if entity.is_new() {
                    return Err(StoreError::invalid_operation(format!(
                        "{} {} already exists",
                        key.0, key.1
                    )));
                }
                Self::check_version(key, entity.system().version, row.system.version)?;
            }
        }

        let mut removals = Vec::with_capacity(ctx.to_remove.len());
        for &node in &ctx.to_remove {
            let entity = graph.get(node)?;
            let Some(id) = entity.id() else {
                continue;
            };
            let key = (entity.class_name().to_string(), id);
            if let Some(row) = state.rows.get(&key) {
                Self::check_version(&key, entity.system().version, row.system.version)?;
                let soft = self.config.soft_delete && entity.meta().is_soft_delete();
                removals.push((key, soft));
            }
        }

        let mut staged = Vec::with_capacity(ctx.to_save.len());
        for &node in &ctx.to_save {
            let entity = graph.get(node)?;
            let key = keys[&node].clone();
            let mut row = state.rows.get(&key).cloned().unwrap_or_else(|| Row {
                meta: Arc::clone(entity.meta()),
                cells: BTreeMap::new(),
                system: entity.system().clone(),
            });
            Self::write_cells(graph, &keys, entity, &mut row)?;
            if let Some(id) = entity.meta().id_property() {
                row.cells.insert(id.to_string(), Cell::Value(key.1.to_value()));
            }
            row.system.instance = entity.system().instance;
            row.system.extra = entity.system().extra.clone();
            row.system.new = false;
            row.system.version = Some(row.system.version.map_or(1, |v| v + 1));
            staged.push((key, row));
        }

        let saved = staged.len();
        for (key, row) in staged {
            state.rows.insert(key, row);
        }
        let removed = removals.len();
        for (key, soft) in removals {
            if soft {
                if let Some(row) = state.rows.get_mut(&key) {
                    row.system.deleted_at = Some(now_millis());
                    row.system.deleted_by = Some(self.config.user.clone());
                    row.system.version = Some(row.system.version.map_or(1, |v| v + 1));
                }
            } else {
                state.rows.remove(&key);
            }
        }
        state.saves += 1;
        debug!(saved, removed, "save applied");

        if ctx.discard_saved {
            return Ok(EntitySet::default());
        }

        let mut projector = Projector::new(&state.rows);
        let mut roots = Vec::with_capacity(ctx.to_save.len());
        for &node in &ctx.to_save {
            let key = &keys[&node];
            let local;
            let plan = match ctx.fetch_plans.get(&node) {
                Some(plan) => plan,
                None => {
                    local = FetchPlan::local(graph.get(node)?.meta());
                    &local
                }
            };
            if let Some(root) = projector.project(key, Some(plan))? {
                roots.push(root);
            }
        }
        Ok(EntitySet {
            graph: projector.finish(),
            roots,
        })
    }
}
