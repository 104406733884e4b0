//! Database Error Types
//!
//! This module defines error types for the persistence layer: document store
//! failures, (de)serialization of stored documents, and the two outcomes of a
//! reverse-parent search that are not a single hit.

use thiserror::Error;

/// Persistence layer errors
///
/// Raised by `TreeRepository` and the payload stores. Business-rule errors
/// are handled by the service-layer `TreeError`.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// The document store rejected or failed an operation
    #[error("Document store operation failed: {context}")]
    OperationFailed { context: String },

    /// A stored document could not be (de)serialized
    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reverse-parent search found no document listing the node as a child
    #[error("Parent of node {id} not found")]
    ParentNotFound { id: String },

    /// Reverse-parent search found more than one parent
    #[error("Node {id} is listed as a child of {count} nodes: {parent_ids:?}")]
    MultipleParents {
        id: String,
        count: usize,
        parent_ids: Vec<String>,
    },
}

impl DatabaseError {
    /// Create an operation failed error with context
    pub fn operation_failed(context: impl Into<String>) -> Self {
        Self::OperationFailed {
            context: context.into(),
        }
    }

    /// Wrap a store error, keeping its full cause chain in the message
    pub fn from_store(action: &str, err: anyhow::Error) -> Self {
        Self::OperationFailed {
            context: format!("{}: {:#}", action, err),
        }
    }

    pub fn parent_not_found(id: impl Into<String>) -> Self {
        Self::ParentNotFound { id: id.into() }
    }

    pub fn multiple_parents(id: impl Into<String>, parent_ids: Vec<String>) -> Self {
        Self::MultipleParents {
            id: id.into(),
            count: parent_ids.len(),
            parent_ids,
        }
    }
}
