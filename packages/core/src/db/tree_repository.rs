//! Tree Repository
//!
//! CRUD over `TreeNode` documents in the tree index. Structural edges are
//! stored only as parent -> children lists; `get_parent` re-derives the
//! reverse edge with a field search for the document whose child list
//! contains the node.
//!
//! # Integrity
//!
//! Exactly one search hit is expected. Zero hits is reported as
//! [`DatabaseError::ParentNotFound`]; more than one is store corruption and
//! reported as [`DatabaseError::MultipleParents`] instead of picking a winner.

use crate::db::document_store::DocumentStore;
use crate::db::DatabaseError;
use crate::models::{NodeType, Tag, TreeNode};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

type Result<T> = std::result::Result<T, DatabaseError>;

const NODE_TAGS_FIELD: &str = "node.tags";
const NODE_TAG_NAMES_FIELD: &str = "node.tags.name";
const NODE_TYPE_FIELD: &str = "node.nodeType";

#[derive(Clone)]
pub struct TreeRepository {
    store: Arc<dyn DocumentStore>,
    index: String,
}

impl TreeRepository {
    pub fn new(store: Arc<dyn DocumentStore>, index: impl Into<String>) -> Self {
        Self {
            store,
            index: index.into(),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Upsert a tree node, assigning id and timestamps as needed.
    ///
    /// Generates a UUID when the id is empty, sets `created` when absent and
    /// always refreshes `last_modified`. Returns the document as read back
    /// from the store.
    pub async fn save(&self, tree_node: TreeNode) -> Result<TreeNode> {
        self.save_with(tree_node, true).await
    }

    /// Like [`save`](Self::save) but leaves `last_modified` as supplied.
    ///
    /// Used by migration replays that carry the original timestamps.
    pub async fn save_preserving_timestamps(&self, tree_node: TreeNode) -> Result<TreeNode> {
        self.save_with(tree_node, false).await
    }

    async fn save_with(&self, mut tree_node: TreeNode, touch_modified: bool) -> Result<TreeNode> {
        let now = Utc::now();
        if tree_node.node.unique_id.is_empty() {
            tree_node.node.unique_id = Uuid::new_v4().to_string();
        }
        if tree_node.node.created.is_none() {
            tree_node.node.created = Some(now);
        }
        if touch_modified || tree_node.node.last_modified.is_none() {
            tree_node.node.last_modified = Some(now);
        }

        let id = tree_node.node.unique_id.clone();
        let doc = serde_json::to_value(&tree_node)?;
        self.store
            .put(&self.index, &id, doc)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("save tree node {}", id), e))?;

        self.find_by_id(&id).await?.ok_or_else(|| {
            DatabaseError::operation_failed(format!("tree node {} not readable after save", id))
        })
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<TreeNode>> {
        let doc = self
            .store
            .get(&self.index, id)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("get tree node {}", id), e))?;
        doc.map(decode).transpose()
    }

    pub async fn exists_by_id(&self, id: &str) -> Result<bool> {
        self.store
            .exists(&self.index, id)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("check tree node {}", id), e))
    }

    /// Bulk fetch. Missing ids are silently omitted; callers needing
    /// strictness compare lengths.
    pub async fn find_all_by_id(&self, ids: &[String]) -> Result<Vec<TreeNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self
            .store
            .multi_get(&self.index, ids)
            .await
            .map_err(|e| DatabaseError::from_store("multi-get tree nodes", e))?;
        docs.into_iter().map(decode).collect()
    }

    /// Resolve the parent of `id` by reverse search over child lists
    pub async fn get_parent(&self, id: &str) -> Result<TreeNode> {
        let hits = self
            .store
            .search_by_field(&self.index, TreeNode::CHILD_NODES_FIELD, id)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("search parent of {}", id), e))?;

        let mut parents = hits
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<_>>>()?;

        match parents.len() {
            0 => Err(DatabaseError::parent_not_found(id)),
            1 => Ok(parents.remove(0)),
            _ => {
                let parent_ids: Vec<String> = parents.iter().map(|p| p.id().to_string()).collect();
                tracing::error!(
                    "Integrity fault: node {} has {} parents: {:?}",
                    id,
                    parent_ids.len(),
                    parent_ids
                );
                Err(DatabaseError::multiple_parents(id, parent_ids))
            }
        }
    }

    /// Nodes carrying at least one tag, or only the golden tag when `golden_only`
    pub async fn search_by_tag(&self, golden_only: bool) -> Result<Vec<TreeNode>> {
        let hits = if golden_only {
            self.store
                .search_by_field(&self.index, NODE_TAG_NAMES_FIELD, Tag::GOLDEN)
                .await
        } else {
            self.store.search_exists(&self.index, NODE_TAGS_FIELD).await
        }
        .map_err(|e| DatabaseError::from_store("search tagged nodes", e))?;

        hits.into_iter().map(decode).collect()
    }

    pub async fn find_by_type(&self, node_type: NodeType) -> Result<Vec<TreeNode>> {
        let hits = self
            .store
            .search_by_field(&self.index, NODE_TYPE_FIELD, node_type.as_str())
            .await
            .map_err(|e| DatabaseError::from_store("search nodes by type", e))?;
        hits.into_iter().map(decode).collect()
    }

    /// Returns whether the node existed
    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        self.store
            .delete(&self.index, id)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("delete tree node {}", id), e))
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.store
            .clear(&self.index)
            .await
            .map_err(|e| DatabaseError::from_store("delete all tree nodes", e))
    }
}

fn decode(doc: Value) -> Result<TreeNode> {
    Ok(serde_json::from_value(doc)?)
}
