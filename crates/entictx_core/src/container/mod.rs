//! Containers: presentation-facing holders of managed entities.
//!
//! - [`InstanceContainer`]: zero or one entity
//! - [`CollectionContainer`]: an ordered list with an id-to-position index
//! - [`PropertyContainer`]: a collection mirroring a collection property of a
//!   master entity
//!
//! Containers hold [`crate::EntityRef`] handles; the entities themselves
//! live in a [`crate::DataContext`].

mod collection;
mod instance;
mod property;

pub use collection::{CollectionContainer, MutableItems};
pub use instance::InstanceContainer;
pub use property::{PropertyContainer, PropertyItems};

use crate::context::EntityRef;

/// Kind of a structural collection change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChangeKind {
    /// The whole content was replaced or reordered.
    Refresh,
    /// Items were added.
    AddItems,
    /// Items were removed.
    RemoveItems,
    /// An item was replaced at its position.
    SetItem,
}

/// Event published by a container.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerEvent {
    /// The current item changed.
    ItemChanged {
        /// Previous current item.
        previous: Option<EntityRef>,
        /// New current item.
        item: Option<EntityRef>,
    },
    /// The content of a collection container changed.
    CollectionChanged {
        /// Kind of change.
        kind: CollectionChangeKind,
        /// Affected items; every item for a refresh.
        items: Vec<EntityRef>,
    },
}
