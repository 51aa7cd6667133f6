//! Error types for Quarry.

use crate::id::{Entity, Id};
use alloc::string::String;
use core::fmt;

/// Result type alias for Quarry operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for query compilation, cache setup and storage access.
#[derive(Debug)]
pub enum Error {
    /// A term is malformed (invalid id, missing relationship, too many terms).
    InvalidTerm {
        term: usize,
        message: String,
    },
    /// A term is well formed but uses a feature the engine does not support.
    UnsupportedTerm {
        term: usize,
        message: String,
    },
    /// The order_by configuration cannot be applied.
    InvalidOrderBy {
        id: Option<Id>,
        message: String,
    },
    /// The group_by configuration cannot be applied.
    InvalidGroupBy {
        message: String,
    },
    /// Entity is not alive.
    EntityNotFound {
        entity: Entity,
    },
    /// Entity does not have the requested component.
    ComponentNotFound {
        entity: Entity,
        id: Id,
    },
    /// Invalid operation.
    InvalidOperation {
        message: String,
    },
    /// Internal consistency check failed.
    Internal {
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidTerm { term, message } => {
                write!(f, "Invalid term {}: {}", term, message)
            }
            Error::UnsupportedTerm { term, message } => {
                write!(f, "Unsupported term {}: {}", term, message)
            }
            Error::InvalidOrderBy { id: Some(id), message } => {
                write!(f, "Invalid order_by on {}: {}", id, message)
            }
            Error::InvalidOrderBy { id: None, message } => {
                write!(f, "Invalid order_by: {}", message)
            }
            Error::InvalidGroupBy { message } => {
                write!(f, "Invalid group_by: {}", message)
            }
            Error::EntityNotFound { entity } => {
                write!(f, "Entity not found: {}", entity)
            }
            Error::ComponentNotFound { entity, id } => {
                write!(f, "Entity {} does not have {}", entity, id)
            }
            Error::InvalidOperation { message } => {
                write!(f, "Invalid operation: {}", message)
            }
            Error::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl Error {
    /// Creates an invalid term error.
    pub fn invalid_term(term: usize, message: impl Into<String>) -> Self {
        Error::InvalidTerm {
            term,
            message: message.into(),
        }
    }

    /// Creates an unsupported term error.
    pub fn unsupported_term(term: usize, message: impl Into<String>) -> Self {
        Error::UnsupportedTerm {
            term,
            message: message.into(),
        }
    }

    /// Creates an order_by error.
    pub fn invalid_order_by(id: Option<Id>, message: impl Into<String>) -> Self {
        Error::InvalidOrderBy {
            id,
            message: message.into(),
        }
    }

    /// Creates a group_by error.
    pub fn invalid_group_by(message: impl Into<String>) -> Self {
        Error::InvalidGroupBy {
            message: message.into(),
        }
    }

    /// Creates an entity not found error.
    pub fn entity_not_found(entity: Entity) -> Self {
        Error::EntityNotFound { entity }
    }

    /// Creates a component not found error.
    pub fn component_not_found(entity: Entity, id: Id) -> Self {
        Error::ComponentNotFound { entity, id }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }
}
