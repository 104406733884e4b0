//! Service Layer Error Types
//!
//! This module defines the errors returned by `TreeDao`. Every error maps to
//! one `ErrorKind`, which is what the web layer uses to choose a status code.

use crate::db::DatabaseError;
use crate::models::ValidationError;
use thiserror::Error;

/// Coarse error classification for callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced node, parent or payload does not exist
    NotFound,
    /// Malformed input or a forbidden structural change
    InvalidArgument,
    /// Sibling name/type collision
    Conflict,
    /// Store-level corruption (e.g. a node with several parents)
    IntegrityFault,
    /// A move/copy target lies inside a source subtree
    CycleRejected,
    /// The document store itself failed
    Storage,
}

/// Tree operation errors
#[derive(Error, Debug)]
pub enum TreeError {
    /// Node not found by ID
    #[error("Node not found: {id}")]
    NodeNotFound { id: String },

    /// Payload document missing for an existing node
    #[error("{kind} data not found for node {id}")]
    PayloadNotFound { kind: &'static str, id: String },

    /// Validation failed for node content
    #[error("Node validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),

    /// Malformed request or forbidden structural change
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Sibling with same name and type already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Store is in a state that violates tree invariants
    #[error("Integrity fault: {0}")]
    IntegrityFault(String),

    /// Circular reference detected
    #[error("Circular reference rejected: {context}")]
    CycleRejected { context: String },

    /// Database operation failed
    #[error("Database operation failed: {0}")]
    DatabaseError(#[from] DatabaseError),

    /// Service initialization failed
    #[error("Initialization error: {0}")]
    InitializationError(String),
}

impl TreeError {
    /// Create a node not found error
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    pub fn payload_not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::PayloadNotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn integrity_fault(msg: impl Into<String>) -> Self {
        Self::IntegrityFault(msg.into())
    }

    /// Create a circular reference error
    pub fn cycle_rejected(context: impl Into<String>) -> Self {
        Self::CycleRejected {
            context: context.into(),
        }
    }

    pub fn initialization_error(msg: impl Into<String>) -> Self {
        Self::InitializationError(msg.into())
    }

    /// Classification of this error for the web layer
    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeError::NodeNotFound { .. } | TreeError::PayloadNotFound { .. } => {
                ErrorKind::NotFound
            }
            TreeError::ValidationFailed(_)
            | TreeError::InvalidArgument(_)
            | TreeError::InitializationError(_) => ErrorKind::InvalidArgument,
            TreeError::Conflict(_) => ErrorKind::Conflict,
            TreeError::IntegrityFault(_) => ErrorKind::IntegrityFault,
            TreeError::CycleRejected { .. } => ErrorKind::CycleRejected,
            TreeError::DatabaseError(db) => match db {
                DatabaseError::ParentNotFound { .. } => ErrorKind::NotFound,
                DatabaseError::MultipleParents { .. } => ErrorKind::IntegrityFault,
                DatabaseError::OperationFailed { .. } | DatabaseError::Serialization(_) => {
                    ErrorKind::Storage
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(TreeError::node_not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(TreeError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(
            TreeError::from(ValidationError::MissingField("name".into())).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            TreeError::from(DatabaseError::multiple_parents("x", vec!["a".into(), "b".into()]))
                .kind(),
            ErrorKind::IntegrityFault
        );
        assert_eq!(
            TreeError::from(DatabaseError::operation_failed("boom")).kind(),
            ErrorKind::Storage
        );
        let bad_doc = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            TreeError::from(DatabaseError::from(bad_doc)).kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_messages_are_descriptive() {
        let err = TreeError::payload_not_found("Snapshot", "abc");
        assert_eq!(err.to_string(), "Snapshot data not found for node abc");
    }
}
