//! # EntiCtx Core
//!
//! A client-side unit of work over entity graphs.
//!
//! This crate provides:
//! - [`DataContext`]: identity map, change tracking and commit of managed
//!   entities, with nested contexts committing into their parent
//! - The merge engine: detached graphs from a [`entictx_store::DataManager`]
//!   become managed entities without duplicating identities
//! - [`container`]: instance, collection and master-detail containers
//! - [`InstanceLoader`] and [`CollectionLoader`]: load-and-merge into
//!   containers
//! - [`EntityComparator`]: in-memory ordering by property paths
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entictx_core::{ContextConfig, DataContext};
//!
//! let mut ctx = DataContext::new(metadata, ContextConfig::default())
//!     .with_data_manager(data_manager);
//! let customer = ctx.create("Customer")?;
//! ctx.set_value(customer, "name", "Alice")?;
//! let committed = ctx.commit()?;
//! ```
//!
//! Entities are addressed by [`EntityRef`] handles into the context's
//! arena. Handles stay valid for the lifetime of the context; after an
//! eviction every accessor reports the handle as unknown.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod change_feed;
mod config;
pub mod container;
mod context;
mod error;
mod loader;
pub mod sort;

pub use change_feed::{ChangeFeed, ContextEvent, FeedEntry, PropertyChange};
pub use config::ContextConfig;
pub use container::{
    CollectionChangeKind, CollectionContainer, ContainerEvent, InstanceContainer,
    PropertyContainer,
};
pub use context::{
    CommitChanges, DataContext, EntityKey, EntityRef, MergeOptions, SharedDataContext,
};
pub use error::{CoreError, CoreResult};
pub use loader::{CollectionLoader, InstanceLoader};
pub use sort::{EntityComparator, Order, Sort};
