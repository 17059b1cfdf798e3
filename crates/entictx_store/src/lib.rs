//! # EntiCtx Store
//!
//! The persistence facade EntiCtx commits to and loads from.
//!
//! This crate provides:
//! - [`DataManager`]: the load/save contract, synchronous and opaque
//! - [`LoadContext`], [`SaveContext`] and [`EntitySet`]: request and result
//!   shapes, all built on detached [`entictx_model::EntityGraph`]s
//! - [`InMemoryDataManager`]: a complete in-memory implementation with id
//!   generation, optimistic locking and soft deletion
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entictx_store::{DataManager, InMemoryDataManager, LoadContext};
//!
//! let dm = InMemoryDataManager::new(metadata);
//! let customers = dm.load(&LoadContext::new("Customer").max_results(10))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod manager;
mod memory;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use manager::{
    Condition, DataManager, Direction, EntitySet, LoadContext, Operator, SaveContext,
};
pub use memory::InMemoryDataManager;
