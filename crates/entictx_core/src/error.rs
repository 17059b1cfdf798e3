//! Error types for data context operations.

use crate::context::EntityRef;
use entictx_model::{EntityId, ModelError};
use entictx_store::StoreError;
use thiserror::Error;

/// Result type for data context operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the data context, containers and loaders.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Metadata, property kind or read-only violation.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// The persistence facade failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The context is not set up for the requested operation.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// An argument does not satisfy the operation's precondition.
    #[error("illegal argument: {message}")]
    IllegalArgument {
        /// Description of the problem.
        message: String,
    },

    /// A loader did not find the requested entity.
    #[error("{class} {id} not found")]
    EntityNotFound {
        /// Entity class.
        class: String,
        /// Requested id.
        id: EntityId,
    },

    /// The handle does not denote an entity of this context.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityRef),

    /// The operation cannot be carried out in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an illegal argument error.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_convert() {
        let err: CoreError = StoreError::failed("disk full").into();
        assert!(matches!(err, CoreError::Store(StoreError::Failed { .. })));
        assert_eq!(err.to_string(), "store error: store failure: disk full");
    }

    #[test]
    fn display_not_found() {
        let err = CoreError::EntityNotFound {
            class: "Customer".into(),
            id: EntityId::Long(7),
        };
        assert_eq!(err.to_string(), "Customer 7 not found");
    }
}
