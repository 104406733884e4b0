//! Database Layer
//!
//! This module handles all persistence for the save-and-restore tree:
//!
//! - `DocumentStore` - the narrow get/put/delete/search contract over a
//!   schema-less JSON document store (no transactions, no joins)
//! - `MemoryDocumentStore` / `FileDocumentStore` - embedded implementations
//! - `TreeRepository` - `TreeNode` CRUD and reverse-parent resolution
//! - `PayloadStore` - per-type payload documents keyed by node id
//!
//! # Architecture
//!
//! The repository and payload stores each talk only to the document store.
//! Multi-document consistency is the service layer's job (see
//! `services::tree_dao`).

pub mod document_store;
mod error;
pub mod events;
mod file_store;
mod memory_store;
mod payload_store;
mod tree_repository;

pub use document_store::DocumentStore;
pub use error::DatabaseError;
pub use events::DomainEvent;
pub use file_store::FileDocumentStore;
pub use memory_store::MemoryDocumentStore;
pub use payload_store::{
    CompositeSnapshotDataStore, ConfigurationDataStore, PayloadStore, SnapshotDataStore,
};
pub use tree_repository::TreeRepository;
