//! # EntiCtx Model
//!
//! Entity metadata and detached entity graphs for EntiCtx.
//!
//! This crate provides:
//! - [`Metadata`]: explicit descriptor tables for entity classes
//! - [`Value`] and [`EntityId`]: scalar values and persistent identifiers
//! - [`Entity`]: a record of loaded properties, generic over its handle type
//! - [`EntityGraph`]: a detached, possibly cyclic, graph of entities
//! - [`FetchPlan`] and [`FetchPlanRepository`]: what "loaded" means
//!
//! ## Usage
//!
//! ```
//! use entictx_model::{EntityGraph, IdStrategy, MetaClass, Metadata, ScalarType};
//!
//! let metadata = Metadata::builder()
//!     .class(
//!         MetaClass::builder("Customer")
//!             .id("id", IdStrategy::Uuid)
//!             .scalar("name", ScalarType::Text)
//!             .instance_name(["name"]),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let mut graph = EntityGraph::new();
//! let node = graph.create(metadata.class("Customer").unwrap()).unwrap();
//! graph.get_mut(node).unwrap().set_value("name", "Alice").unwrap();
//! assert!(graph.get(node).unwrap().is_new());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
pub mod fetch_plan;
mod graph;
mod id;
pub mod instance_name;
mod meta;
mod value;

pub use entity::{Entity, PropertyValue, SystemState};
pub use error::{ModelError, ModelResult};
pub use fetch_plan::{FetchPlan, FetchPlanRepository};
pub use graph::{EntityGraph, NodeId};
pub use id::{EntityId, InstanceId};
pub use meta::{
    CollectionKind, IdStrategy, MetaClass, MetaClassBuilder, MetaProperty, Metadata,
    MetadataBuilder, PropertyKind,
};
pub use value::{ScalarType, Value};
