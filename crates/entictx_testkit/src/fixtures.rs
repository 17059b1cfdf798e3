//! Test fixtures: a sample schema, stores and detached graphs.
//!
//! The sample schema is a small order-management model:
//! - `Customer` (uuid id, soft delete) with an embedded `Address` and a list
//!   of `Order`s
//! - `Order` (sequence id) referencing its `Customer`, with a list of
//!   `OrderLine`s and a set of `Tag`s
//! - `OrderLine` (sequence id) referencing its `Order`
//! - `Tag` (uuid id)

use entictx_core::{ContextConfig, DataContext, SharedDataContext};
use entictx_model::{
    Entity, EntityGraph, EntityId, IdStrategy, MetaClass, Metadata, NodeId, ScalarType,
    SystemState, Value,
};
use entictx_store::InMemoryDataManager;
use std::sync::Arc;

/// Builds the sample schema.
pub fn sample_metadata() -> Arc<Metadata> {
    Metadata::builder()
        .class(
            MetaClass::builder("Customer")
                .id("id", IdStrategy::Uuid)
                .scalar("name", ScalarType::Text)
                .mandatory()
                .scalar("email", ScalarType::Text)
                .embedded("address", "Address")
                .list("orders", "Order")
                .soft_delete()
                .instance_name(["name"]),
        )
        .class(
            MetaClass::builder("Address")
                .embeddable()
                .scalar("street", ScalarType::Text)
                .scalar("city", ScalarType::Text),
        )
        .class(
            MetaClass::builder("Order")
                .id("id", IdStrategy::Sequence)
                .scalar("number", ScalarType::Text)
                .scalar("amount", ScalarType::Integer)
                .reference("customer", "Customer")
                .list("lines", "OrderLine")
                .set("tags", "Tag")
                .instance_name(["number", "customer"]),
        )
        .class(
            MetaClass::builder("OrderLine")
                .id("id", IdStrategy::Sequence)
                .scalar("product", ScalarType::Text)
                .scalar("quantity", ScalarType::Integer)
                .reference("order", "Order")
                .instance_name(["product"]),
        )
        .class(
            MetaClass::builder("Tag")
                .id("id", IdStrategy::Uuid)
                .scalar("label", ScalarType::Text)
                .instance_name(["label"]),
        )
        .build()
        .expect("sample metadata is valid")
}

/// An in-memory store over the sample schema.
pub struct TestStore {
    /// The schema.
    pub metadata: Arc<Metadata>,
    /// The data manager.
    pub dm: Arc<InMemoryDataManager>,
}

impl TestStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let metadata = sample_metadata();
        Self {
            dm: Arc::new(InMemoryDataManager::new(Arc::clone(&metadata))),
            metadata,
        }
    }

    /// A top-level context committing to this store.
    pub fn context(&self) -> DataContext {
        self.context_with(ContextConfig::default())
    }

    /// A top-level context with a specific configuration.
    pub fn context_with(&self, config: ContextConfig) -> DataContext {
        DataContext::new(Arc::clone(&self.metadata), config).with_data_manager(self.dm.clone())
    }

    /// A top-level context wrapped for nesting.
    pub fn shared_context(&self) -> SharedDataContext {
        self.context().into_shared()
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = InMemoryDataManager;

    fn deref(&self) -> &Self::Target {
        &self.dm
    }
}

/// Builds detached graphs, as a data manager would return them.
pub struct GraphBuilder {
    metadata: Arc<Metadata>,
    graph: EntityGraph,
}

impl GraphBuilder {
    /// Creates an empty graph over `metadata`.
    pub fn new(metadata: &Arc<Metadata>) -> Self {
        Self {
            metadata: Arc::clone(metadata),
            graph: EntityGraph::new(),
        }
    }

    /// Adds a stored entity with only its id loaded.
    pub fn persisted(&mut self, class: &str, id: impl Into<EntityId>) -> NodeId {
        let meta = self.metadata.class(class).expect("class in schema");
        let mut system = SystemState::new_instance();
        system.new = false;
        system.version = Some(1);
        let mut entity = Entity::unloaded(Arc::clone(meta), system);
        let id_property = meta.id_property().expect("class has an id");
        entity
            .set_value(id_property, id.into().to_value())
            .expect("id is writable");
        self.graph.add(entity).expect("graph has room")
    }

    /// Adds a new, fully loaded entity without id.
    pub fn fresh(&mut self, class: &str) -> NodeId {
        let meta = self.metadata.class(class).expect("class in schema");
        self.graph.create(meta).expect("graph has room")
    }

    /// Sets a scalar.
    pub fn set(&mut self, node: NodeId, property: &str, value: impl Into<Value>) -> &mut Self {
        self.entity(node)
            .set_value(property, value)
            .expect("scalar property");
        self
    }

    /// Sets a reference or embedded property.
    pub fn link(&mut self, node: NodeId, property: &str, target: Option<NodeId>) -> &mut Self {
        self.entity(node)
            .set_reference(property, target)
            .expect("reference property");
        self
    }

    /// Sets a collection property.
    pub fn items(&mut self, node: NodeId, property: &str, items: Vec<NodeId>) -> &mut Self {
        self.entity(node)
            .set_collection(property, items)
            .expect("collection property");
        self
    }

    /// The graph built so far.
    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    /// Finishes the graph.
    pub fn build(self) -> EntityGraph {
        self.graph
    }

    fn entity(&mut self, node: NodeId) -> &mut Entity<NodeId> {
        self.graph.get_mut(node).expect("node in graph")
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A store populated through a committed context.
    pub struct Populated {
        /// The store.
        pub store: TestStore,
        /// Customer ids in creation order.
        pub customers: Vec<EntityId>,
        /// Order ids in creation order.
        pub orders: Vec<EntityId>,
    }

    /// Creates `customers` customers named `Customer 000`, `Customer 001`, …
    /// with `orders_per_customer` orders each.
    ///
    /// Order `j` of customer `i` has number `O-i-j` and amount `10 * (j + 1)`.
    pub fn populated_store(customers: usize, orders_per_customer: usize) -> Populated {
        let store = TestStore::new();
        let mut ctx = store.context();
        let mut customer_refs = Vec::with_capacity(customers);
        let mut order_refs = Vec::new();
        for i in 0..customers {
            let c = ctx.create("Customer").expect("create customer");
            ctx.set_value(c, "name", format!("Customer {i:03}"))
                .expect("set name");
            for j in 0..orders_per_customer {
                let o = ctx.create("Order").expect("create order");
                ctx.set_value(o, "number", format!("O-{i}-{j}"))
                    .expect("set number");
                let amount = i64::try_from(10 * (j + 1)).expect("small amount");
                ctx.set_value(o, "amount", amount).expect("set amount");
                ctx.set_reference(o, "customer", Some(c))
                    .expect("set customer");
                ctx.add_to_collection(c, "orders", o).expect("add order");
                order_refs.push(o);
            }
            customer_refs.push(c);
        }
        ctx.commit().expect("populate store");

        let ids = |refs: &[entictx_core::EntityRef]| -> Vec<EntityId> {
            refs.iter()
                .map(|h| ctx.id_of(*h).expect("committed entity has id"))
                .collect()
        };
        let customers = ids(&customer_refs);
        let orders = ids(&order_refs);
        Populated {
            store,
            customers,
            orders,
        }
    }

    /// A detached customer and order referencing each other.
    ///
    /// Returns the graph, the customer node and the order node.
    pub fn customer_order_cycle(metadata: &Arc<Metadata>) -> (EntityGraph, NodeId, NodeId) {
        let mut builder = GraphBuilder::new(metadata);
        let c = builder.persisted("Customer", EntityId::random());
        let o = builder.persisted("Order", 1_i64);
        builder
            .set(c, "name", "Alice")
            .items(c, "orders", vec![o])
            .set(o, "number", "O-1")
            .link(o, "customer", Some(c));
        (builder.build(), c, o)
    }
}
