//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use entictx_model::{EntityId, Value};
use proptest::prelude::*;
use uuid::Uuid;

fn uuid_from_u128(bits: u128) -> EntityId {
    EntityId::Uuid(Uuid::from_u128(bits))
}

/// Strategy for generating uuid entity ids.
pub fn uuid_id_strategy() -> impl Strategy<Value = EntityId> {
    any::<u128>().prop_map(uuid_from_u128)
}

/// Strategy for generating sequence entity ids.
pub fn long_id_strategy() -> impl Strategy<Value = EntityId> {
    (1i64..1_000_000).prop_map(EntityId::Long)
}

/// Strategy for generating display names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][a-z]{0,11}").expect("Invalid regex")
}

/// Strategy for generating optional display names.
pub fn optional_name_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(name_strategy())
}

/// Strategy for generating scalar values of mixed types, nulls included.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        name_strategy().prop_map(Value::Text),
    ]
}

/// Strategy for generating customer rows with distinct uuid ids.
pub fn customer_rows_strategy(max: usize) -> impl Strategy<Value = Vec<(EntityId, String)>> {
    prop::collection::btree_map(any::<u128>(), name_strategy(), 0..=max).prop_map(|rows| {
        rows.into_iter()
            .map(|(bits, name)| (uuid_from_u128(bits), name))
            .collect()
    })
}

/// A structural operation on a list of items, addressed by item number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOp {
    /// Append item `n`.
    Push(u8),
    /// Insert item `n` at a position, taken modulo the length plus one.
    Insert(usize, u8),
    /// Remove item `n` if present.
    Remove(u8),
    /// Remove at a position, taken modulo the length.
    RemoveAt(usize),
    /// Replace at a position, taken modulo the length.
    Set(usize, u8),
    /// Remove everything.
    Clear,
}

/// Strategy for generating list operations over items `0..items`.
pub fn list_ops_strategy(items: u8, max_ops: usize) -> impl Strategy<Value = Vec<ListOp>> {
    let op = prop_oneof![
        4 => (0..items).prop_map(ListOp::Push),
        2 => (any::<usize>(), 0..items).prop_map(|(i, n)| ListOp::Insert(i, n)),
        2 => (0..items).prop_map(ListOp::Remove),
        2 => any::<usize>().prop_map(ListOp::RemoveAt),
        1 => (any::<usize>(), 0..items).prop_map(|(i, n)| ListOp::Set(i, n)),
        1 => Just(ListOp::Clear),
    ];
    prop::collection::vec(op, 0..max_ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn customer_ids_are_distinct(rows in customer_rows_strategy(8)) {
            let mut ids: Vec<&EntityId> = rows.iter().map(|(id, _)| id).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), rows.len());
        }

        #[test]
        fn names_are_not_empty(name in name_strategy()) {
            prop_assert!(!name.is_empty());
        }
    }
}
