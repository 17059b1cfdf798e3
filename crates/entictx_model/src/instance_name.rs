//! Instance names: the human readable representation of an entity.

use crate::entity::{Entity, PropertyValue};
use crate::value::Value;

/// One component of an instance name.
///
/// Class-typed instance name properties resolve through the referenced
/// entity's own instance name.
#[derive(Debug, Clone, PartialEq)]
pub enum NamePart {
    /// A scalar component.
    Value(Value),
    /// The instance name of a referenced entity.
    Nested(Vec<NamePart>),
}

impl NamePart {
    fn render(&self, out: &mut Vec<String>) {
        match self {
            NamePart::Value(v) if v.is_null() => {}
            NamePart::Value(v) => out.push(v.to_string()),
            NamePart::Nested(parts) => parts.iter().for_each(|p| p.render(out)),
        }
    }
}

/// Collects the instance name components of an entity.
///
/// `resolve` maps a handle to the referenced entity. Unloaded components and
/// dangling handles produce a null component. Components nested deeper than
/// a few levels are cut off, so cyclic instance names terminate.
pub fn name_parts<'a, R, F>(entity: &'a Entity<R>, resolve: &F) -> Vec<NamePart>
where
    R: Clone + PartialEq + 'a,
    F: Fn(&R) -> Option<&'a Entity<R>>,
{
    parts_bounded(entity, resolve, 4)
}

fn parts_bounded<'a, R, F>(entity: &'a Entity<R>, resolve: &F, depth: usize) -> Vec<NamePart>
where
    R: Clone + PartialEq + 'a,
    F: Fn(&R) -> Option<&'a Entity<R>>,
{
    entity
        .meta()
        .instance_name()
        .iter()
        .map(|name| match entity.get(name) {
            Some(PropertyValue::Scalar(v)) => NamePart::Value(v.clone()),
            Some(PropertyValue::Reference(Some(r))) if depth > 0 => match resolve(r) {
                Some(target) => NamePart::Nested(parts_bounded(target, resolve, depth - 1)),
                None => NamePart::Value(Value::Null),
            },
            _ => NamePart::Value(Value::Null),
        })
        .collect()
}

/// Renders an instance name: components joined by a single space.
///
/// Entities without instance name properties render as `Class-id`.
pub fn render<'a, R, F>(entity: &'a Entity<R>, resolve: &F) -> String
where
    R: Clone + PartialEq + 'a,
    F: Fn(&R) -> Option<&'a Entity<R>>,
{
    if entity.meta().instance_name().is_empty() {
        return match entity.id() {
            Some(id) => format!("{}-{id}", entity.class_name()),
            None => format!("{}-new", entity.class_name()),
        };
    }
    let mut out = Vec::new();
    for part in name_parts(entity, resolve) {
        part.render(&mut out);
    }
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EntityGraph, NodeId};
    use crate::meta::{IdStrategy, MetaClass, Metadata};
    use crate::value::ScalarType;

    #[test]
    fn renders_nested_names() {
        let meta = Metadata::builder()
            .class(
                MetaClass::builder("Customer")
                    .id("id", IdStrategy::Uuid)
                    .scalar("first", ScalarType::Text)
                    .scalar("last", ScalarType::Text)
                    .instance_name(["first", "last"]),
            )
            .class(
                MetaClass::builder("Order")
                    .id("id", IdStrategy::Sequence)
                    .scalar("number", ScalarType::Text)
                    .reference("customer", "Customer")
                    .instance_name(["number", "customer"]),
            )
            .build()
            .unwrap();
        let mut graph = EntityGraph::new();
        let c = graph.create(meta.class("Customer").unwrap()).unwrap();
        let o = graph.create(meta.class("Order").unwrap()).unwrap();
        {
            let customer = graph.get_mut(c).unwrap();
            customer.set_value("first", "Ada").unwrap();
            customer.set_value("last", "Lovelace").unwrap();
        }
        {
            let order = graph.get_mut(o).unwrap();
            order.set_value("number", "A-1").unwrap();
            order.set_reference("customer", Some(c)).unwrap();
        }
        let resolve = |n: &NodeId| graph.get(*n).ok();
        let order = graph.get(o).unwrap();
        assert_eq!(render(order, &resolve), "A-1 Ada Lovelace");
        assert_eq!(
            name_parts(graph.get(c).unwrap(), &resolve),
            vec![
                NamePart::Value(Value::text("Ada")),
                NamePart::Value(Value::text("Lovelace"))
            ]
        );
    }

    #[test]
    fn fallback_without_instance_name() {
        let meta = Metadata::builder()
            .class(MetaClass::builder("Thing").id("id", IdStrategy::Sequence))
            .build()
            .unwrap();
        let mut graph = EntityGraph::new();
        let t = graph.create(meta.class("Thing").unwrap()).unwrap();
        let resolve = |n: &NodeId| graph.get(*n).ok();
        assert_eq!(render(graph.get(t).unwrap(), &resolve), "Thing-new");
    }
}
