//! Node Data Structures
//!
//! This module defines the `Node` metadata shared by every entity in the
//! save-and-restore tree, the closed `NodeType` set, tags, and the `TreeNode`
//! document that carries the structural edges.
//!
//! # Architecture
//!
//! - **Child list is the source of truth**: a `TreeNode` owns the ids of its
//!   children. A node's parent is derived by searching for the document whose
//!   child list contains it.
//! - **Payload lives elsewhere**: configuration, snapshot and composite
//!   snapshot data are separate documents keyed by the node's unique id
//!   (see [`crate::models::payload`]).
//!
//! # Examples
//!
//! ```rust
//! use saverestore_core::models::{Node, NodeType};
//!
//! let folder = Node::new("Accelerator", NodeType::Folder, "operator");
//! assert!(folder.unique_id.is_empty()); // assigned on first save
//! assert!(NodeType::Folder.can_contain(NodeType::Configuration));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation errors for Node contents
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid node type: {0}")]
    InvalidNodeType(String),

    #[error("Invalid tag: {0}")]
    InvalidTag(String),
}

/// The four kinds of node in the tree.
///
/// Behaviour that varies by type (parent/child compatibility, payload
/// ownership) is expressed as exhaustive matches here rather than scattered
/// type tests in the DAO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Folder,
    Configuration,
    Snapshot,
    CompositeSnapshot,
}

/// Which payload store holds the data of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Configuration,
    Snapshot,
    CompositeSnapshot,
}

impl PayloadKind {
    pub fn label(self) -> &'static str {
        match self {
            PayloadKind::Configuration => "Configuration",
            PayloadKind::Snapshot => "Snapshot",
            PayloadKind::CompositeSnapshot => "Composite snapshot",
        }
    }
}

impl NodeType {
    /// Whether a node of this type may hold a child of type `child` as a tree edge.
    ///
    /// Root-specific rules (root holds folders only) are enforced by the DAO.
    pub fn can_contain(self, child: NodeType) -> bool {
        match self {
            NodeType::Folder => matches!(
                child,
                NodeType::Folder | NodeType::Configuration | NodeType::CompositeSnapshot
            ),
            NodeType::Configuration => child == NodeType::Snapshot,
            NodeType::Snapshot | NodeType::CompositeSnapshot => false,
        }
    }

    /// Whether nodes of this type own tree edges at all
    pub fn has_children(self) -> bool {
        match self {
            NodeType::Folder | NodeType::Configuration => true,
            NodeType::Snapshot | NodeType::CompositeSnapshot => false,
        }
    }

    /// The payload document owned by nodes of this type, if any
    pub fn payload_kind(self) -> Option<PayloadKind> {
        match self {
            NodeType::Folder => None,
            NodeType::Configuration => Some(PayloadKind::Configuration),
            NodeType::Snapshot => Some(PayloadKind::Snapshot),
            NodeType::CompositeSnapshot => Some(PayloadKind::CompositeSnapshot),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Folder => "FOLDER",
            NodeType::Configuration => "CONFIGURATION",
            NodeType::Snapshot => "SNAPSHOT",
            NodeType::CompositeSnapshot => "COMPOSITE_SNAPSHOT",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FOLDER" => Ok(NodeType::Folder),
            "CONFIGURATION" => Ok(NodeType::Configuration),
            "SNAPSHOT" => Ok(NodeType::Snapshot),
            "COMPOSITE_SNAPSHOT" => Ok(NodeType::CompositeSnapshot),
            other => Err(ValidationError::InvalidNodeType(other.to_string())),
        }
    }
}

/// A label attached to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default)]
    pub user_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl Tag {
    /// Reserved tag name marking a preferred snapshot
    pub const GOLDEN: &'static str = "golden";

    pub fn new(name: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: None,
            user_name: user_name.into(),
            created: Some(Utc::now()),
        }
    }

    pub fn golden(user_name: impl Into<String>) -> Self {
        Self::new(Self::GOLDEN, user_name)
    }

    /// Exact match, the same comparison the golden-snapshot search uses
    pub fn is_golden(&self) -> bool {
        self.name == Self::GOLDEN
    }
}

/// A tag together with the nodes it should be added to or removed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagData {
    pub tag: Tag,
    pub unique_node_ids: Vec<String>,
}

/// Metadata of a single tree entity.
///
/// An empty `unique_id` means "not yet persisted": the repository assigns a
/// UUID on first save. `created` and `last_modified` are likewise filled in by
/// the repository unless the caller supplies them (migration replays).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default)]
    pub unique_id: String,

    pub name: String,

    pub node_type: NodeType,

    /// Owner of the node
    #[serde(default)]
    pub user_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ordered set: at most one tag per name
    #[serde(default)]
    pub tags: Vec<Tag>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Node {
    /// Create an unsaved node with no id or timestamps
    pub fn new(name: impl Into<String>, node_type: NodeType, user_name: impl Into<String>) -> Self {
        Self {
            unique_id: String::new(),
            name: name.into(),
            node_type,
            user_name: user_name.into(),
            description: None,
            tags: Vec::new(),
            created: None,
            last_modified: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.add_tag(tag);
        self
    }

    /// Add a tag unless one with the same name is already present.
    ///
    /// Returns `true` if the tag set changed.
    pub fn add_tag(&mut self, tag: Tag) -> bool {
        if self.has_tag(&tag.name) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    /// Remove the tag with the given name. Returns `true` if one was removed.
    pub fn remove_tag(&mut self, name: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t.name != name);
        self.tags.len() != before
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }

    /// True when a sibling with this name and type would collide with `other`
    pub fn collides_with(&self, other: &Node) -> bool {
        self.name == other.name && self.node_type == other.node_type
    }

    /// A fresh, unsaved node carrying this node's name, type, tags and
    /// description, owned by `user_name`.
    pub fn clone_for(&self, user_name: impl Into<String>) -> Node {
        Node {
            unique_id: String::new(),
            name: self.name.clone(),
            node_type: self.node_type,
            user_name: user_name.into(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            created: None,
            last_modified: None,
        }
    }

    /// Validate caller-supplied content (name, owner, tags)
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name".to_string()));
        }
        if self.user_name.trim().is_empty() {
            return Err(ValidationError::MissingField("userName".to_string()));
        }
        if self.node_type != NodeType::Snapshot && self.tags.iter().any(Tag::is_golden) {
            return Err(ValidationError::InvalidTag(format!(
                "golden tag is only allowed on snapshots, not on {}",
                self.node_type
            )));
        }
        Ok(())
    }
}

/// The stored tree document: a node plus its structural edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub node: Node,

    /// Unordered ids of the child nodes
    #[serde(default)]
    pub child_nodes: Vec<String>,
}

impl TreeNode {
    /// Document field holding the child id list, used for reverse-parent search
    pub const CHILD_NODES_FIELD: &'static str = "childNodes";

    pub fn new(node: Node) -> Self {
        Self {
            node,
            child_nodes: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.node.unique_id
    }

    pub fn add_child(&mut self, child_id: &str) {
        if !self.child_nodes.iter().any(|c| c == child_id) {
            self.child_nodes.push(child_id.to_string());
        }
    }

    /// Remove every id in `ids` from the child list. Returns how many were removed.
    pub fn remove_children(&mut self, ids: &[String]) -> usize {
        let before = self.child_nodes.len();
        self.child_nodes.retain(|c| !ids.contains(c));
        before - self.child_nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_compatibility_matrix() {
        assert!(NodeType::Folder.can_contain(NodeType::Folder));
        assert!(NodeType::Folder.can_contain(NodeType::Configuration));
        assert!(!NodeType::Folder.can_contain(NodeType::Snapshot));
        assert!(NodeType::Configuration.can_contain(NodeType::Snapshot));
        assert!(!NodeType::Configuration.can_contain(NodeType::Folder));
        assert!(!NodeType::Snapshot.can_contain(NodeType::Snapshot));
        assert!(!NodeType::CompositeSnapshot.can_contain(NodeType::Snapshot));
    }

    #[test]
    fn test_node_type_wire_names() {
        let json = serde_json::to_string(&NodeType::CompositeSnapshot).unwrap();
        assert_eq!(json, "\"COMPOSITE_SNAPSHOT\"");
        assert_eq!(
            "CONFIGURATION".parse::<NodeType>().unwrap(),
            NodeType::Configuration
        );
        assert!("folder".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_tags_form_a_set_by_name() {
        let mut node = Node::new("snap", NodeType::Snapshot, "user");
        assert!(node.add_tag(Tag::new("beam", "user")));
        assert!(!node.add_tag(Tag::new("beam", "other")));
        assert_eq!(node.tags.len(), 1);
        assert!(node.remove_tag("beam"));
        assert!(!node.remove_tag("beam"));
    }

    #[test]
    fn test_validate_rejects_empty_name_and_owner() {
        let node = Node::new("  ", NodeType::Folder, "user");
        assert_eq!(
            node.validate(),
            Err(ValidationError::MissingField("name".to_string()))
        );

        let node = Node::new("folder", NodeType::Folder, "");
        assert!(node.validate().is_err());
    }

    #[test]
    fn test_golden_tag_only_on_snapshots() {
        let folder = Node::new("f", NodeType::Folder, "user").with_tag(Tag::golden("user"));
        assert!(matches!(
            folder.validate(),
            Err(ValidationError::InvalidTag(_))
        ));

        let snapshot = Node::new("s", NodeType::Snapshot, "user").with_tag(Tag::golden("user"));
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_golden_tag_name_is_case_sensitive() {
        let upper = Tag::new("GOLDEN", "user");
        assert!(!upper.is_golden());
        assert!(Tag::golden("user").is_golden());

        // Not the reserved tag, so allowed anywhere
        let folder = Node::new("f", NodeType::Folder, "user").with_tag(upper);
        assert!(folder.validate().is_ok());
    }

    #[test]
    fn test_tree_node_serializes_child_list_field() {
        let mut tree_node = TreeNode::new(Node::new("f", NodeType::Folder, "user"));
        tree_node.add_child("a");
        tree_node.add_child("a");
        let value = serde_json::to_value(&tree_node).unwrap();
        assert_eq!(value[TreeNode::CHILD_NODES_FIELD], serde_json::json!(["a"]));
        assert_eq!(value["node"]["nodeType"], "FOLDER");
    }
}
