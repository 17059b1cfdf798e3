//! In-memory ordering of managed entities.
//!
//! Sort paths are dotted property paths resolved through references. A path
//! ending at a reference orders by the referenced entity's instance name.

use crate::context::{DataContext, EntityRef};
use entictx_model::instance_name::{self, NamePart};
use entictx_model::{PropertyValue, Value};
use entictx_store::Direction;
use std::cmp::Ordering;

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Dotted property path.
    pub path: String,
    /// Sort direction.
    pub direction: Direction,
}

impl Order {
    /// Ascending order by `path`.
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: Direction::Asc,
        }
    }

    /// Descending order by `path`.
    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: Direction::Desc,
        }
    }
}

/// Ordered list of sort criteria; later criteria break ties of earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort {
    /// Criteria in priority order.
    pub orders: Vec<Order>,
}

impl Sort {
    /// Sort by a single path.
    pub fn by(path: impl Into<String>, direction: Direction) -> Self {
        Self {
            orders: vec![Order {
                path: path.into(),
                direction,
            }],
        }
    }

    /// Ascending sort by a single path.
    pub fn asc(path: impl Into<String>) -> Self {
        Self::by(path, Direction::Asc)
    }

    /// Descending sort by a single path.
    pub fn desc(path: impl Into<String>) -> Self {
        Self::by(path, Direction::Desc)
    }

    /// Appends a tie-breaking criterion.
    #[must_use]
    pub fn then(mut self, path: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Order {
            path: path.into(),
            direction,
        });
        self
    }

    /// Returns `true` if there are no criteria.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

enum SortKey<'a> {
    Null,
    Value(&'a Value),
    Entity(EntityRef),
}

/// Compares managed entities of one context by a [`Sort`].
///
/// - Text compares case-insensitively; other scalars by natural order
/// - Entities compare by their instance name components
/// - Nulls go last (or first) for ascending criteria; descending criteria
///   reverse the whole comparison, null placement included
#[derive(Debug, Clone, Copy)]
pub struct EntityComparator<'a> {
    ctx: &'a DataContext,
    nulls_last: bool,
}

impl<'a> EntityComparator<'a> {
    /// Creates a comparator using the context's null policy.
    pub fn new(ctx: &'a DataContext) -> Self {
        Self {
            ctx,
            nulls_last: ctx.config().nulls_last,
        }
    }

    /// Overrides the null policy.
    #[must_use]
    pub const fn nulls_last(mut self, nulls_last: bool) -> Self {
        self.nulls_last = nulls_last;
        self
    }

    /// Compares two entities by every criterion of `sort`.
    pub fn compare(&self, a: EntityRef, b: EntityRef, sort: &Sort) -> Ordering {
        sort.orders
            .iter()
            .map(|order| self.compare_path(a, b, &order.path, order.direction))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Compares two entities by one path.
    pub fn compare_path(
        &self,
        a: EntityRef,
        b: EntityRef,
        path: &str,
        direction: Direction,
    ) -> Ordering {
        let ord = self.compare_keys(self.key(a, path), self.key(b, path));
        match direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    }

    /// Stable-sorts `items` in place.
    pub fn sort(&self, items: &mut [EntityRef], sort: &Sort) {
        if sort.is_empty() {
            return;
        }
        items.sort_by(|a, b| self.compare(*a, *b, sort));
    }

    fn key(&self, h: EntityRef, path: &str) -> SortKey<'a> {
        let mut current = h;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let last = segments.peek().is_none();
            let Some(entity) = self.ctx.entity(current) else {
                return SortKey::Null;
            };
            match entity.get(segment) {
                Some(PropertyValue::Scalar(v)) if last && !v.is_null() => return SortKey::Value(v),
                Some(PropertyValue::Reference(Some(target))) if last => {
                    return SortKey::Entity(*target)
                }
                Some(PropertyValue::Reference(Some(target))) => current = *target,
                _ => return SortKey::Null,
            }
        }
        SortKey::Null
    }

    fn compare_keys(&self, a: SortKey<'_>, b: SortKey<'_>) -> Ordering {
        match (a, b) {
            (SortKey::Null, SortKey::Null) => Ordering::Equal,
            (SortKey::Null, _) => self.null_ordering(),
            (_, SortKey::Null) => self.null_ordering().reverse(),
            (SortKey::Value(x), SortKey::Value(y)) => compare_values(x, y),
            (SortKey::Entity(x), SortKey::Entity(y)) => self.compare_entities(x, y),
            _ => Ordering::Equal,
        }
    }

    fn null_ordering(&self) -> Ordering {
        if self.nulls_last {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    fn compare_entities(&self, a: EntityRef, b: EntityRef) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        let (Some(ea), Some(eb)) = (self.ctx.entity(a), self.ctx.entity(b)) else {
            return Ordering::Equal;
        };
        let resolve = |r: &EntityRef| self.ctx.entity(*r);
        if ea.meta().instance_name().is_empty() || eb.meta().instance_name().is_empty() {
            let (na, nb) = (
                instance_name::render(ea, &resolve),
                instance_name::render(eb, &resolve),
            );
            return na.to_lowercase().cmp(&nb.to_lowercase());
        }
        self.compare_parts(
            &instance_name::name_parts(ea, &resolve),
            &instance_name::name_parts(eb, &resolve),
        )
    }

    fn compare_parts(&self, a: &[NamePart], b: &[NamePart]) -> Ordering {
        for (pa, pb) in a.iter().zip(b) {
            let ord = match (pa, pb) {
                (NamePart::Value(x), NamePart::Value(y)) => {
                    self.compare_keys(part_key(x), part_key(y))
                }
                (NamePart::Nested(x), NamePart::Nested(y)) => self.compare_parts(x, y),
                _ => Ordering::Equal,
            };
            if ord.is_ne() {
                return ord;
            }
        }
        a.len().cmp(&b.len())
    }
}

fn part_key(value: &Value) -> SortKey<'_> {
    if value.is_null() {
        SortKey::Null
    } else {
        SortKey::Value(value)
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_text(), b.as_text()) {
        (Some(x), Some(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        _ => a.natural_cmp(b).unwrap_or(Ordering::Equal),
    }
}
