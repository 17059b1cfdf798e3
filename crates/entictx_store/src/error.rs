//! Error types for persistence operations.

use entictx_model::{EntityId, ModelError};
use thiserror::Error;

/// Result type for persistence operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`crate::DataManager`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Metadata or graph error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// The entity was changed by someone else since it was loaded.
    #[error("optimistic lock failure on {class} {id}: expected version {expected}, found {actual}")]
    OptimisticLock {
        /// Entity class.
        class: String,
        /// Entity id.
        id: EntityId,
        /// Version carried by the saved entity.
        expected: i64,
        /// Version currently stored.
        actual: i64,
    },

    /// A mandatory property is null.
    #[error("mandatory property {class}.{property} is null")]
    MandatoryMissing {
        /// Entity class.
        class: String,
        /// Property name.
        property: String,
    },

    /// The requested entity does not exist.
    #[error("{class} {id} not found")]
    NotFound {
        /// Entity class.
        class: String,
        /// Entity id.
        id: EntityId,
    },

    /// The request cannot be carried out.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The backing store failed.
    #[error("store failure: {message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a store failure error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}
