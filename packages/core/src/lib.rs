//! Save-and-Restore Core Business Logic Layer
//!
//! This crate provides the node tree, payload storage and data access rules
//! for a control-system save-and-restore backend: folders, PV
//! configurations, captured snapshots and composite snapshots.
//!
//! # Architecture
//!
//! - **Schema-less document store**: everything is a JSON document behind the
//!   narrow [`db::DocumentStore`] contract (get/put/delete/search, no
//!   transactions, no joins)
//! - **Child list as source of truth**: a node's parent is re-derived by a
//!   reverse search; more than one hit is reported as an integrity fault
//! - **Separate payloads**: node metadata and type-specific data live in
//!   different indices, kept consistent by the DAO's write protocol
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, TreeNode, payload documents)
//! - [`db`] - Document stores, tree repository, payload stores, events
//! - [`services`] - `TreeDao` business rules and errors
//! - [`config`] - Index names and root identity

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::StoreConfig;
pub use models::*;
pub use services::*;
