//! Data Models
//!
//! This module contains the data structures stored by the save-and-restore
//! backend:
//!
//! - `Node` / `TreeNode` - tree metadata and structural edges
//! - `NodeType` - the closed set of node kinds
//! - Payload documents (`ConfigurationData`, `SnapshotData`,
//!   `CompositeSnapshotData`) keyed by the owning node's id

mod node;
pub mod payload;

pub use node::{Node, NodeType, PayloadKind, Tag, TagData, TreeNode, ValidationError};
pub use payload::{
    CompositeSnapshot, CompositeSnapshotData, ConfigPv, Configuration, ConfigurationData,
    PayloadDocument, Snapshot, SnapshotData, SnapshotItem, ValueStatus,
};
