//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised by metadata, entity and fetch plan operations.
///
/// Every variant describes a structural or configuration problem. None of
/// them is transient, so callers are not expected to retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The metadata registry is inconsistent.
    #[error("metadata configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// No entity class with the given name is registered.
    #[error("unknown entity class: {class}")]
    UnknownClass {
        /// Name of the class.
        class: String,
    },

    /// The entity class has no property with the given name.
    #[error("unknown property {property} on {class}")]
    UnknownProperty {
        /// Name of the class.
        class: String,
        /// Name of the property.
        property: String,
    },

    /// A value of the wrong shape was written to a property.
    #[error("property {class}.{property} expects {expected}")]
    KindMismatch {
        /// Name of the class.
        class: String,
        /// Name of the property.
        property: String,
        /// Human readable description of the expected kind.
        expected: String,
    },

    /// A read-only property was written.
    #[error("property {class}.{property} is read-only")]
    ReadOnly {
        /// Name of the class.
        class: String,
        /// Name of the property.
        property: String,
    },

    /// A value cannot be used as an entity identifier.
    #[error("invalid entity id: {message}")]
    InvalidId {
        /// Description of the problem.
        message: String,
    },

    /// A node handle does not belong to the graph.
    #[error("node {node} is not part of the graph")]
    UnknownNode {
        /// Raw node index.
        node: u32,
    },

    /// A graph holds as many nodes as a handle can address.
    #[error("graph is full at {len} nodes")]
    TooManyNodes {
        /// Number of nodes in the graph.
        len: usize,
    },

    /// A fetch plan could not be resolved or parsed.
    #[error("fetch plan error: {message}")]
    FetchPlan {
        /// Description of the problem.
        message: String,
    },
}

impl ModelError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an unknown class error.
    pub fn unknown_class(class: impl Into<String>) -> Self {
        Self::UnknownClass {
            class: class.into(),
        }
    }

    /// Creates an unknown property error.
    pub fn unknown_property(class: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            class: class.into(),
            property: property.into(),
        }
    }

    /// Creates a kind mismatch error.
    pub fn kind_mismatch(
        class: impl Into<String>,
        property: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::KindMismatch {
            class: class.into(),
            property: property.into(),
            expected: expected.into(),
        }
    }

    /// Creates an invalid id error.
    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::InvalidId {
            message: message.into(),
        }
    }

    /// Creates a fetch plan error.
    pub fn fetch_plan(message: impl Into<String>) -> Self {
        Self::FetchPlan {
            message: message.into(),
        }
    }
}
