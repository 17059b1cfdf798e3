//! Container, comparator and loader scenarios.

use entictx_core::container::CollectionChangeKind;
use entictx_core::{
    CollectionContainer, CollectionLoader, ContainerEvent, EntityComparator, EntityRef,
    InstanceContainer, InstanceLoader, PropertyContainer, Sort,
};
use entictx_model::{FetchPlan, Value};
use entictx_store::Direction;
use entictx_testkit::prelude::*;
use proptest::prelude::*;
use std::cmp::Ordering;

#[test]
fn mutable_items_keep_the_index() {
    init_tracing();
    let store = TestStore::new();
    let mut ctx = store.context();
    let existing: Vec<EntityRef> = (0..3).map(|_| ctx.create("Customer").unwrap()).collect();
    let mut container = CollectionContainer::new("Customer");
    container.set_items(existing);

    let e = ctx.create("Customer").unwrap();
    container.mutable_items().push(e);
    assert_eq!(container.item_index(e), Some(3));

    assert!(container.mutable_items().remove(e));
    assert!(!container.contains_item(e));
    assert_eq!(container.size(), 3);
}

#[test]
fn comparator_orders_alice_before_bob() {
    let store = TestStore::new();
    let mut ctx = store.context();
    let bob = ctx.create("Customer").unwrap();
    ctx.set_value(bob, "name", "Bob").unwrap();
    let alice = ctx.create("Customer").unwrap();
    ctx.set_value(alice, "name", "Alice").unwrap();
    let sort = Sort::asc("name");

    let cmp = EntityComparator::new(&ctx);
    assert_eq!(cmp.compare(alice, bob, &sort), Ordering::Less);
    assert_eq!(cmp.compare(bob, alice, &sort), Ordering::Greater);

    // Orders compare by their customer's instance name.
    let o1 = ctx.create("Order").unwrap();
    ctx.set_reference(o1, "customer", Some(bob)).unwrap();
    let o2 = ctx.create("Order").unwrap();
    ctx.set_reference(o2, "customer", Some(alice)).unwrap();
    let cmp = EntityComparator::new(&ctx);
    assert_eq!(cmp.compare(o2, o1, &Sort::asc("customer")), Ordering::Less);
}

#[test]
fn loaders_fill_containers_from_the_store() {
    init_tracing();
    let populated = scenarios::populated_store(3, 2);
    let store = &populated.store;
    let mut ctx = store.context();

    let mut customers = CollectionContainer::new("Customer");
    let mut loader = CollectionLoader::new("Customer").sort("name", Direction::Desc);
    let items = loader
        .load(store.dm.as_ref(), &mut ctx, &mut customers)
        .unwrap()
        .unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(
        ctx.value(customers.items()[0], "name"),
        Some(&Value::text("Customer 002"))
    );

    let mut single = InstanceContainer::new("Customer");
    let mut loader = InstanceLoader::new("Customer").entity_id(populated.customers[0].clone());
    let h = loader
        .load(store.dm.as_ref(), &mut ctx, &mut single)
        .unwrap()
        .unwrap();
    assert!(customers.contains_item(h));
    assert_eq!(customers.item_index(h), Some(2));
    assert_eq!(ctx.len(), 3);
    assert!(!ctx.has_changes());
}

#[test]
fn master_detail_writes_reach_the_store() {
    init_tracing();
    let populated = scenarios::populated_store(1, 3);
    let store = &populated.store;
    let mut ctx = store.context();
    let plan = FetchPlan::new("Customer")
        .add("name")
        .add_nested("orders", FetchPlan::new("Order").add("number"));

    let mut master = InstanceContainer::new("Customer").with_fetch_plan(plan);
    let customer = InstanceLoader::new("Customer")
        .entity_id(populated.customers[0].clone())
        .load(store.dm.as_ref(), &mut ctx, &mut master)
        .unwrap()
        .unwrap();

    let mut orders = PropertyContainer::new("Order", "orders");
    orders.bind(&ctx, Some(customer)).unwrap();
    assert_eq!(orders.size(), 3);
    let rx = orders.subscribe();

    let first = orders.items()[0];
    orders.mutable_items(&mut ctx).remove(first).unwrap();
    assert!(ctx.is_modified(customer));
    assert_eq!(ctx.collection(customer, "orders").unwrap().len(), 2);
    assert_eq!(
        rx.try_recv().unwrap().event,
        ContainerEvent::CollectionChanged {
            kind: CollectionChangeKind::RemoveItems,
            items: vec![first],
        }
    );

    ctx.commit().unwrap();
    let mut fresh = store.context();
    let mut reloaded = InstanceContainer::new("Customer").with_fetch_plan(
        FetchPlan::new("Customer").add_nested("orders", FetchPlan::new("Order")),
    );
    let h = InstanceLoader::new("Customer")
        .entity_id(populated.customers[0].clone())
        .load(store.dm.as_ref(), &mut fresh, &mut reloaded)
        .unwrap()
        .unwrap();
    assert_eq!(fresh.collection(h, "orders").unwrap().len(), 2);
}

fn apply(container: &mut CollectionContainer, model: &mut Vec<EntityRef>, op: &ListOp) {
    let h = |n: u8| EntityRef::from_raw(u32::from(n));
    let mut items = container.mutable_items();
    match *op {
        ListOp::Push(n) => {
            items.push(h(n));
            model.push(h(n));
        }
        ListOp::Insert(i, n) => {
            let i = i % (model.len() + 1);
            items.insert(i, h(n)).unwrap();
            model.insert(i, h(n));
        }
        ListOp::Remove(n) => {
            let removed = items.remove(h(n));
            match model.iter().position(|x| *x == h(n)) {
                Some(pos) => {
                    assert!(removed);
                    model.remove(pos);
                }
                None => assert!(!removed),
            }
        }
        ListOp::RemoveAt(i) if !model.is_empty() => {
            let i = i % model.len();
            assert_eq!(items.remove_at(i).unwrap(), model.remove(i));
        }
        ListOp::Set(i, n) if !model.is_empty() => {
            let i = i % model.len();
            let old = items.set(i, h(n)).unwrap();
            assert_eq!(old, std::mem::replace(&mut model[i], h(n)));
        }
        ListOp::RemoveAt(_) | ListOp::Set(..) => {}
        ListOp::Clear => {
            items.clear();
            model.clear();
        }
    }
}

proptest! {
    #[test]
    fn container_index_matches_items(ops in list_ops_strategy(6, 40)) {
        let mut container = CollectionContainer::new("Customer");
        let mut model = Vec::new();

        for op in &ops {
            apply(&mut container, &mut model, op);
            prop_assert_eq!(container.items(), model.as_slice());
            for h in &model {
                let first = model.iter().position(|x| x == h);
                prop_assert_eq!(container.item_index(*h), first);
            }
        }
    }

    #[test]
    fn comparator_is_a_consistent_order(names in prop::collection::vec(optional_name_strategy(), 0..12)) {
        let store = TestStore::new();
        let mut ctx = store.context();
        let mut items = Vec::new();
        for name in &names {
            let h = ctx.create("Customer").unwrap();
            if let Some(name) = name {
                ctx.set_value(h, "name", name.as_str()).unwrap();
            }
            items.push(h);
        }
        let sort = Sort::asc("name");
        let cmp = EntityComparator::new(&ctx);
        cmp.sort(&mut items, &sort);

        for pair in items.windows(2) {
            prop_assert_ne!(cmp.compare(pair[0], pair[1], &sort), Ordering::Greater);
        }
        for a in &items {
            for b in &items {
                prop_assert_eq!(cmp.compare(*a, *b, &sort), cmp.compare(*b, *a, &sort).reverse());
            }
        }
    }
}
