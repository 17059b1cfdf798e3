//! # EntiCtx Testkit
//!
//! Test utilities for EntiCtx.
//!
//! This crate provides:
//! - A sample schema and stores populated through it
//! - Builders for detached entity graphs
//! - Property-based test generators using proptest
//! - Logging setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entictx_testkit::prelude::*;
//!
//! #[test]
//! fn loads_customers() {
//!     init_tracing();
//!     let store = scenarios::populated_store(3, 2);
//!     let mut ctx = store.context();
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
