//! Tree DAO - Node Lifecycle and Structural Operations
//!
//! `TreeDao` is the business-rule layer over [`TreeRepository`] and the three
//! payload stores:
//!
//! - Node lifecycle (create, update, recursive delete)
//! - Structural operations (move, deep copy) with cycle prevention
//! - Path resolution (`/Top/Cfg` <-> node ids)
//! - Tag management
//!
//! Payload bundles (configurations, snapshots, composite snapshots) live in
//! `services::bundles` as a second `impl TreeDao` block.
//!
//! # Consistency
//!
//! The document store has no multi-document transactions. Every operation
//! validates all of its preconditions before the first write; once writes
//! begin they proceed best-effort and errors are surfaced without rollback,
//! except where a compensating action is cheap (see `insert_node` and the
//! bundle writes).
//!
//! # Traversal
//!
//! Subtree walks (delete, copy, containment) use explicit worklists instead
//! of recursion, so arbitrarily deep trees cannot exhaust the stack.

use crate::config::StoreConfig;
use crate::db::document_store::DocumentStore;
use crate::db::{
    CompositeSnapshotDataStore, ConfigurationDataStore, DatabaseError, DomainEvent, PayloadStore,
    SnapshotDataStore, TreeRepository,
};
use crate::models::{Node, NodeType, PayloadDocument, PayloadKind, Tag, TagData, TreeNode, ValidationError};
use crate::services::error::TreeError;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the domain event channel
const DOMAIN_EVENT_CHANNEL_CAPACITY: usize = 128;

type Result<T> = std::result::Result<T, TreeError>;

/// Data access object for the save-and-restore node tree
///
/// # Examples
///
/// ```rust
/// # use saverestore_core::config::StoreConfig;
/// # use saverestore_core::db::MemoryDocumentStore;
/// # use saverestore_core::models::{Node, NodeType};
/// # use saverestore_core::services::TreeDao;
/// # use std::sync::Arc;
/// # tokio_test::block_on(async {
/// let dao = TreeDao::new(Arc::new(MemoryDocumentStore::new()), StoreConfig::default())?;
/// let root = dao.get_root_node().await?;
///
/// let top = dao
///     .create_node(&root.unique_id, Node::new("Top", NodeType::Folder, "operator"))
///     .await?;
/// assert_eq!(dao.get_full_path(&top.unique_id).await?, "/Top");
/// # Ok::<(), saverestore_core::services::TreeError>(())
/// # });
/// ```
#[derive(Clone)]
pub struct TreeDao {
    pub(crate) tree: TreeRepository,
    pub(crate) configurations: ConfigurationDataStore,
    pub(crate) snapshots: SnapshotDataStore,
    pub(crate) composites: CompositeSnapshotDataStore,
    config: Arc<StoreConfig>,

    /// Broadcast channel for domain events (128 subscriber capacity)
    event_tx: broadcast::Sender<DomainEvent>,
}

impl TreeDao {
    /// Create a DAO over `store` using the index layout in `config`.
    ///
    /// The root folder is not written here; it is created lazily by the
    /// first operation that needs it.
    ///
    /// # Errors
    ///
    /// Returns `InitializationError` when `config` fails validation.
    pub fn new(store: Arc<dyn DocumentStore>, config: StoreConfig) -> Result<Self> {
        config.validate().map_err(TreeError::initialization_error)?;

        let (event_tx, _) = broadcast::channel(DOMAIN_EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            tree: TreeRepository::new(store.clone(), config.tree_index.clone()),
            configurations: PayloadStore::new(store.clone(), config.configuration_index.clone()),
            snapshots: PayloadStore::new(store.clone(), config.snapshot_index.clone()),
            composites: PayloadStore::new(store, config.composite_snapshot_index.clone()),
            config: Arc::new(config),
            event_tx,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Subscribe to domain events
    ///
    /// Events are sent only after every store write of an operation has
    /// succeeded.
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.event_tx.subscribe()
    }

    /// Ignores errors if no subscribers (expected in most tests)
    pub(crate) fn emit_event(&self, event: DomainEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn is_root(&self, id: &str) -> bool {
        id == self.config.root_node_id
    }

    // ------------------------------------------------------------------
    // Root and reads
    // ------------------------------------------------------------------

    async fn ensure_root(&self) -> Result<TreeNode> {
        if let Some(root) = self.tree.find_by_id(&self.config.root_node_id).await? {
            return Ok(root);
        }

        let mut node = Node::new(
            self.config.root_node_name.clone(),
            NodeType::Folder,
            self.config.root_user_name.clone(),
        );
        node.unique_id = self.config.root_node_id.clone();
        let root = self.tree.save(TreeNode::new(node)).await?;

        tracing::info!("Created root folder {}", root.id());
        Ok(root)
    }

    /// The root folder, created on first access
    pub async fn get_root_node(&self) -> Result<Node> {
        Ok(self.ensure_root().await?.node)
    }

    /// Load a tree node, materializing the root when asked for it
    pub(crate) async fn load(&self, id: &str) -> Result<TreeNode> {
        if self.is_root(id) {
            return self.ensure_root().await;
        }
        self.tree
            .find_by_id(id)
            .await?
            .ok_or_else(|| TreeError::node_not_found(id))
    }

    /// Resolve the parent of an existing node.
    ///
    /// A non-root node without exactly one parent violates the tree
    /// invariants, so both the zero and the many case are integrity faults.
    pub(crate) async fn parent_of(&self, id: &str) -> Result<TreeNode> {
        if self.is_root(id) {
            return self.ensure_root().await;
        }
        match self.tree.get_parent(id).await {
            Ok(parent) => Ok(parent),
            Err(DatabaseError::ParentNotFound { .. }) => Err(TreeError::integrity_fault(format!(
                "node {} is not linked from any parent",
                id
            ))),
            Err(e @ DatabaseError::MultipleParents { .. }) => {
                Err(TreeError::integrity_fault(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Children of `tree_node`; ids that no longer resolve are skipped
    pub(crate) async fn children_of(&self, tree_node: &TreeNode) -> Result<Vec<TreeNode>> {
        let children = self.tree.find_all_by_id(&tree_node.child_nodes).await?;
        if children.len() != tree_node.child_nodes.len() {
            tracing::warn!(
                "Node {} lists {} children but only {} exist",
                tree_node.id(),
                tree_node.child_nodes.len(),
                children.len()
            );
        }
        Ok(children)
    }

    pub async fn get_node(&self, id: &str) -> Result<Node> {
        tracing::debug!("Get node {}", id);
        Ok(self.load(id).await?.node)
    }

    /// Nodes for the given ids; unknown ids are omitted
    pub async fn get_nodes(&self, ids: &[String]) -> Result<Vec<Node>> {
        let nodes = self.tree.find_all_by_id(ids).await?;
        Ok(nodes.into_iter().map(|n| n.node).collect())
    }

    /// Parent of `id`. The root folder is its own parent.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` if `id` does not exist
    /// - `IntegrityFault` if the node has zero or several parents
    pub async fn get_parent_node(&self, id: &str) -> Result<Node> {
        if !self.is_root(id) && !self.tree.exists_by_id(id).await? {
            return Err(TreeError::node_not_found(id));
        }
        Ok(self.parent_of(id).await?.node)
    }

    pub async fn get_child_nodes(&self, id: &str) -> Result<Vec<Node>> {
        tracing::debug!("Get child nodes of {}", id);
        let tree_node = self.load(id).await?;
        let children = self.children_of(&tree_node).await?;
        Ok(children.into_iter().map(|c| c.node).collect())
    }

    /// Snapshot children of a configuration node
    pub async fn get_snapshots(&self, configuration_id: &str) -> Result<Vec<Node>> {
        let configuration = self.load(configuration_id).await?;
        if configuration.node.node_type != NodeType::Configuration {
            return Err(TreeError::invalid_argument(format!(
                "Node {} is a {} node, not a configuration",
                configuration_id, configuration.node.node_type
            )));
        }
        let children = self.children_of(&configuration).await?;
        Ok(children
            .into_iter()
            .map(|c| c.node)
            .filter(|n| n.node_type == NodeType::Snapshot)
            .collect())
    }

    pub async fn get_all_snapshots(&self) -> Result<Vec<Node>> {
        let snapshots = self.tree.find_by_type(NodeType::Snapshot).await?;
        Ok(snapshots.into_iter().map(|s| s.node).collect())
    }

    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Validate that `node` may be created under `parent_id`.
    ///
    /// Returns the loaded parent. Nothing is written.
    pub(crate) async fn check_create(&self, parent_id: &str, node: &Node) -> Result<TreeNode> {
        node.validate()?;

        let parent = self.load(parent_id).await?;

        if self.is_root(parent.id()) && node.node_type != NodeType::Folder {
            return Err(TreeError::invalid_argument(format!(
                "Root folder may only contain folder nodes, not {}",
                node.node_type
            )));
        }
        if !parent.node.node_type.can_contain(node.node_type) {
            return Err(TreeError::invalid_argument(format!(
                "A {} node cannot be created in a {} node",
                node.node_type, parent.node.node_type
            )));
        }
        if !node.unique_id.is_empty() && self.tree.exists_by_id(&node.unique_id).await? {
            return Err(TreeError::conflict(format!(
                "Node with id {} already exists",
                node.unique_id
            )));
        }

        let siblings = self.children_of(&parent).await?;
        if siblings.iter().any(|s| s.node.collides_with(node)) {
            return Err(TreeError::conflict(format!(
                "A {} node named '{}' already exists in parent node {}",
                node.node_type,
                node.name,
                parent.id()
            )));
        }

        Ok(parent)
    }

    /// Persist a validated node and link it into `parent`.
    ///
    /// If linking fails the just-written node document is removed again so
    /// no unreachable node is left behind. Emits no event.
    pub(crate) async fn insert_node(&self, mut parent: TreeNode, node: Node) -> Result<Node> {
        // Migration replays carry their own last_modified
        let created = if node.last_modified.is_some() {
            self.tree.save_preserving_timestamps(TreeNode::new(node)).await?
        } else {
            self.tree.save(TreeNode::new(node)).await?
        };

        parent.add_child(created.id());
        let parent_id = parent.id().to_string();
        if let Err(e) = self.tree.save(parent).await {
            tracing::warn!(
                "Linking node {} into parent {} failed, removing unlinked node: {}",
                created.id(),
                parent_id,
                e
            );
            if let Err(cleanup) = self.tree.delete_by_id(created.id()).await {
                tracing::warn!("Could not remove unlinked node {}: {}", created.id(), cleanup);
            }
            return Err(e.into());
        }

        Ok(created.node)
    }

    /// Create `node` under `parent_id`.
    ///
    /// A supplied unique id and timestamps are kept (migration replays);
    /// missing ones are assigned.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` if the parent does not exist
    /// - `InvalidArgument` for an empty name or owner, or a type-incompatible parent
    /// - `Conflict` if a sibling with the same name and type exists
    pub async fn create_node(&self, parent_id: &str, node: Node) -> Result<Node> {
        let parent = self.check_create(parent_id, &node).await?;
        let created = self.insert_node(parent, node).await?;

        tracing::info!(
            "Created {} node '{}' ({}) in {}",
            created.node_type,
            created.name,
            created.unique_id,
            parent_id
        );
        self.emit_event(DomainEvent::NodeAdded(created.clone()));
        Ok(created)
    }

    /// Validate an update of `node`. Returns the stored version. Nothing is written.
    pub(crate) async fn check_update(&self, node: &Node) -> Result<TreeNode> {
        if self.is_root(&node.unique_id) {
            return Err(TreeError::invalid_argument("Updating the root node is not allowed"));
        }

        let existing = self
            .tree
            .find_by_id(&node.unique_id)
            .await?
            .ok_or_else(|| TreeError::node_not_found(&node.unique_id))?;

        if existing.node.node_type != node.node_type {
            return Err(TreeError::invalid_argument(format!(
                "Changing node type from {} to {} is not allowed",
                existing.node.node_type, node.node_type
            )));
        }
        node.validate()?;

        let parent = self.parent_of(&node.unique_id).await?;
        if existing.node.name != node.name {
            let siblings = self.children_of(&parent).await?;
            if siblings
                .iter()
                .any(|s| s.id() != node.unique_id && s.node.collides_with(node))
            {
                return Err(TreeError::conflict(format!(
                    "A {} node named '{}' already exists in parent node {}",
                    node.node_type,
                    node.name,
                    parent.id()
                )));
            }
        }

        Ok(existing)
    }

    /// Write a validated update, keeping the stored child list. Emits no event.
    pub(crate) async fn persist_update(
        &self,
        existing: TreeNode,
        mut node: Node,
        preserve_created_for_migration: bool,
    ) -> Result<Node> {
        let now = Utc::now();
        node.created = if preserve_created_for_migration {
            Some(now)
        } else {
            existing.node.created
        };
        node.last_modified = Some(now);

        let updated = self
            .tree
            .save(TreeNode {
                node,
                child_nodes: existing.child_nodes,
            })
            .await?;
        Ok(updated.node)
    }

    /// Rename, re-describe or re-tag an existing node.
    ///
    /// The type and child list cannot change through this call. When the
    /// name changes, sibling uniqueness is re-checked against the current
    /// parent.
    pub async fn update_node(&self, node: Node, preserve_created_for_migration: bool) -> Result<Node> {
        let existing = self.check_update(&node).await?;
        let updated = self
            .persist_update(existing, node, preserve_created_for_migration)
            .await?;

        tracing::info!("Updated node '{}' ({})", updated.name, updated.unique_id);
        self.emit_event(DomainEvent::NodeUpdated(updated.clone()));
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    pub async fn delete_node(&self, id: &str) -> Result<()> {
        self.delete_nodes(&[id.to_string()]).await
    }

    /// Delete nodes together with their subtrees and payloads.
    ///
    /// All ids are validated (exist, not root, parent resolvable, no
    /// snapshot referenced from a composite snapshot outside the deleted
    /// subtrees) before anything is removed. Ids nested inside another
    /// listed subtree are deleted as part of that subtree.
    pub async fn delete_nodes(&self, ids: &[String]) -> Result<()> {
        let mut unique_ids: Vec<&String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !unique_ids.contains(&id) {
                unique_ids.push(id);
            }
        }

        let mut tops = Vec::with_capacity(unique_ids.len());
        for id in unique_ids {
            if self.is_root(id) {
                return Err(TreeError::invalid_argument("Root node cannot be deleted"));
            }
            let node = self
                .tree
                .find_by_id(id)
                .await?
                .ok_or_else(|| TreeError::node_not_found(id))?;
            self.parent_of(id).await?;
            tops.push(node);
        }

        let mut subtrees = Vec::with_capacity(tops.len());
        for top in &tops {
            subtrees.push(self.collect_subtree(top).await?);
        }

        let doomed: HashSet<String> = subtrees
            .iter()
            .flatten()
            .map(|n| n.id().to_string())
            .collect();
        self.check_not_referenced(subtrees.iter().flatten(), &doomed)
            .await?;

        let members: Vec<HashSet<&str>> = subtrees
            .iter()
            .map(|s| s.iter().map(|n| n.id()).collect())
            .collect();
        let nested: Vec<bool> = tops
            .iter()
            .enumerate()
            .map(|(i, top)| {
                members
                    .iter()
                    .enumerate()
                    .any(|(j, m)| j != i && m.contains(top.id()))
            })
            .collect();

        let mut removed = Vec::new();
        for ((top, subtree), nested) in tops.iter().zip(subtrees.iter()).zip(nested) {
            if nested {
                continue;
            }
            removed.extend(self.remove_subtree(top.id(), subtree).await?);
        }

        tracing::info!("Deleted {} node(s) in {} subtree(s)", removed.len(), tops.len());
        for id in removed {
            self.emit_event(DomainEvent::NodeRemoved(id));
        }
        Ok(())
    }

    /// The subtree rooted at `top`, children before parents
    async fn collect_subtree(&self, top: &TreeNode) -> Result<Vec<TreeNode>> {
        let mut stack = vec![top.clone()];
        let mut seen = HashSet::new();
        let mut preorder = Vec::new();

        while let Some(current) = stack.pop() {
            if !seen.insert(current.id().to_string()) {
                tracing::error!("Integrity fault: node {} reached twice in subtree of {}", current.id(), top.id());
                continue;
            }
            stack.extend(self.children_of(&current).await?);
            preorder.push(current);
        }

        preorder.reverse();
        Ok(preorder)
    }

    /// Reject deletion of snapshots still referenced by a surviving composite
    async fn check_not_referenced<'a>(
        &self,
        nodes: impl Iterator<Item = &'a TreeNode>,
        doomed: &HashSet<String>,
    ) -> Result<()> {
        let referencable: HashSet<&str> = nodes
            .filter(|n| {
                matches!(
                    n.node.node_type,
                    NodeType::Snapshot | NodeType::CompositeSnapshot
                )
            })
            .map(|n| n.id())
            .collect();
        if referencable.is_empty() {
            return Ok(());
        }

        for composite in self.composites.find_all().await? {
            if doomed.contains(&composite.unique_id) {
                continue;
            }
            let hit = composite
                .referenced_snapshot_nodes
                .iter()
                .find(|r| referencable.contains(r.as_str()));
            if let Some(referenced) = hit {
                let referrer = match self.tree.find_by_id(&composite.unique_id).await? {
                    Some(n) => n.node.name,
                    None => composite.unique_id.clone(),
                };
                return Err(TreeError::invalid_argument(format!(
                    "Cannot delete node {} as it is referenced in composite snapshot '{}'",
                    referenced, referrer
                )));
            }
        }
        Ok(())
    }

    /// Remove a validated subtree. Returns the ids removed.
    async fn remove_subtree(&self, top_id: &str, subtree: &[TreeNode]) -> Result<Vec<String>> {
        let mut removed = Vec::with_capacity(subtree.len());

        for tree_node in subtree {
            let id = tree_node.id().to_string();
            if id == top_id {
                let mut parent = self.parent_of(&id).await?;
                parent.remove_children(std::slice::from_ref(&id));
                self.tree.save(parent).await?;
            }

            self.tree.delete_by_id(&id).await?;
            if let Some(kind) = tree_node.node.node_type.payload_kind() {
                if !self.delete_payload(kind, &id).await? {
                    tracing::warn!("{} data for node {} was already missing", kind.label(), id);
                }
            }
            tracing::debug!("Deleted {} node {}", tree_node.node.node_type, id);
            removed.push(id);
        }

        Ok(removed)
    }

    pub(crate) async fn delete_payload(&self, kind: PayloadKind, id: &str) -> Result<bool> {
        let existed = match kind {
            PayloadKind::Configuration => self.configurations.delete_by_id(id).await?,
            PayloadKind::Snapshot => self.snapshots.delete_by_id(id).await?,
            PayloadKind::CompositeSnapshot => self.composites.delete_by_id(id).await?,
        };
        Ok(existed)
    }

    // ------------------------------------------------------------------
    // Move / copy
    // ------------------------------------------------------------------

    async fn load_sources(&self, ids: &[String]) -> Result<Vec<Node>> {
        let mut sources: Vec<Node> = Vec::with_capacity(ids.len());
        for id in ids {
            if sources.iter().any(|s| &s.unique_id == id) {
                continue;
            }
            sources.push(self.load(id).await?.node);
        }
        Ok(sources)
    }

    /// Check whether `sources` may be moved or copied into `target`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the target is not a folder, a source is the
    ///   target, the root or a snapshot, a configuration or composite
    ///   snapshot would land in the root folder, or the batch mixes types
    ///   or parents
    /// - `Conflict` if the target already holds a child with the name and
    ///   type of a source
    /// - `CycleRejected` if the target lies inside a source subtree
    pub async fn is_move_or_copy_allowed(&self, sources: &[Node], target: &Node) -> Result<()> {
        self.check_move_or_copy(sources, target).await.map(|_| ())
    }

    /// Returns the common parent of the sources
    async fn check_move_or_copy(&self, sources: &[Node], target: &Node) -> Result<TreeNode> {
        let first = sources
            .first()
            .ok_or_else(|| TreeError::invalid_argument("No source nodes given"))?;

        if target.node_type != NodeType::Folder {
            return Err(TreeError::invalid_argument(format!(
                "Target node {} is a {} node, only folders accept moved or copied nodes",
                target.unique_id, target.node_type
            )));
        }

        for source in sources {
            if source.unique_id == target.unique_id {
                return Err(TreeError::invalid_argument(
                    "At least one source node is the same as the target node",
                ));
            }
            if self.is_root(&source.unique_id) {
                return Err(TreeError::invalid_argument(
                    "Root node cannot be moved or copied",
                ));
            }
            if source.node_type == NodeType::Snapshot {
                return Err(TreeError::invalid_argument(
                    "Snapshot nodes cannot be moved or copied individually",
                ));
            }
            if source.node_type != first.node_type {
                return Err(TreeError::invalid_argument(
                    "All source nodes must be of the same type",
                ));
            }
        }

        if self.is_root(&target.unique_id) && first.node_type != NodeType::Folder {
            return Err(TreeError::invalid_argument(format!(
                "{} nodes cannot be placed in the root folder",
                first.node_type
            )));
        }

        let parent = self.parent_of(&first.unique_id).await?;
        for source in &sources[1..] {
            if self.parent_of(&source.unique_id).await?.id() != parent.id() {
                return Err(TreeError::invalid_argument(
                    "All source nodes must have the same parent node",
                ));
            }
        }

        let target_tree = self.load(&target.unique_id).await?;
        let target_children = self.children_of(&target_tree).await?;
        for source in sources {
            if let Some(clash) = target_children.iter().find(|c| c.node.collides_with(source)) {
                return Err(TreeError::conflict(format!(
                    "Target already contains a {} node named '{}'",
                    clash.node.node_type, clash.node.name
                )));
            }
        }

        for source in sources {
            if self
                .is_contained_in_subtree(&source.unique_id, &target.unique_id)
                .await?
            {
                return Err(TreeError::cycle_rejected(format!(
                    "target {} lies inside the subtree of {}",
                    target.unique_id, source.unique_id
                )));
            }
        }

        Ok(parent)
    }

    /// Move nodes sharing one parent into the folder `target_id`.
    ///
    /// Only the parent edge moves; the source subtrees are untouched.
    /// Returns the updated target.
    pub async fn move_nodes(&self, ids: &[String], target_id: &str, user_name: &str) -> Result<Node> {
        let target = self.load(target_id).await?;
        let sources = self.load_sources(ids).await?;
        let mut parent = self.check_move_or_copy(&sources, &target.node).await?;

        let moved: Vec<String> = sources.iter().map(|s| s.unique_id.clone()).collect();

        parent.remove_children(&moved);
        let parent = self.tree.save(parent).await?;

        let mut target = self.load(target_id).await?;
        for id in &moved {
            target.add_child(id);
        }
        let target = self.tree.save(target).await?;

        tracing::info!(
            "{} moved {} node(s) from {} to {}",
            user_name,
            moved.len(),
            parent.id(),
            target.id()
        );
        self.emit_event(DomainEvent::NodeUpdated(parent.node));
        self.emit_event(DomainEvent::NodeUpdated(target.node.clone()));
        Ok(target.node)
    }

    /// Deep-copy nodes sharing one parent into the folder `target_id`.
    ///
    /// Every node of every source subtree is cloned (new id, same name,
    /// type, tags and description, owned by `user_name`) together with its
    /// payload. Composite snapshot references are copied verbatim and keep
    /// pointing at the original snapshots. Returns the updated target.
    pub async fn copy_nodes(&self, ids: &[String], target_id: &str, user_name: &str) -> Result<Node> {
        if user_name.trim().is_empty() {
            return Err(ValidationError::MissingField("userName".to_string()).into());
        }
        let target = self.load(target_id).await?;
        let sources = self.load_sources(ids).await?;
        self.check_move_or_copy(&sources, &target.node).await?;

        let mut id_map = HashMap::new();
        for source in &sources {
            self.copy_subtree(&source.unique_id, target_id, user_name, &mut id_map)
                .await?;
        }

        tracing::info!(
            "{} copied {} node(s) into {}",
            user_name,
            id_map.len(),
            target_id
        );
        Ok(self.load(target_id).await?.node)
    }

    /// Clone the subtree at `source_id` under `target_id`, recording every
    /// old id -> new id pair in `id_map`.
    async fn copy_subtree(
        &self,
        source_id: &str,
        target_id: &str,
        user_name: &str,
        id_map: &mut HashMap<String, String>,
    ) -> Result<()> {
        // (original id, original parent id); None places the node under the target
        let mut worklist: Vec<(String, Option<String>)> = vec![(source_id.to_string(), None)];

        while let Some((old_id, old_parent)) = worklist.pop() {
            let new_parent = match &old_parent {
                None => target_id.to_string(),
                Some(p) => id_map.get(p).cloned().ok_or_else(|| {
                    TreeError::integrity_fault(format!("no copy recorded for parent {} of {}", p, old_id))
                })?,
            };

            let original = match self.tree.find_by_id(&old_id).await? {
                Some(original) => original,
                None => {
                    tracing::warn!("Skipping missing child {} while copying {}", old_id, source_id);
                    continue;
                }
            };

            let clone = original.node.clone_for(user_name);
            let parent = self.check_create(&new_parent, &clone).await?;
            let copy = self.insert_node(parent, clone).await?;

            if let Some(kind) = original.node.node_type.payload_kind() {
                self.copy_payload(kind, &old_id, &copy.unique_id).await?;
            }

            tracing::debug!("Copied node {} to {}", old_id, copy.unique_id);
            id_map.insert(old_id.clone(), copy.unique_id.clone());
            self.emit_event(DomainEvent::NodeAdded(copy));

            for child in original.child_nodes.iter().rev() {
                worklist.push((child.clone(), Some(old_id.clone())));
            }
        }

        Ok(())
    }

    async fn copy_payload(&self, kind: PayloadKind, from: &str, to: &str) -> Result<()> {
        match kind {
            PayloadKind::Configuration => clone_payload(&self.configurations, from, to).await,
            PayloadKind::Snapshot => clone_payload(&self.snapshots, from, to).await,
            PayloadKind::CompositeSnapshot => clone_payload(&self.composites, from, to).await,
        }
    }

    /// Whether `candidate_id` appears anywhere below `start_id`
    pub async fn is_contained_in_subtree(&self, start_id: &str, candidate_id: &str) -> Result<bool> {
        let start = self.load(start_id).await?;
        let mut stack = start.child_nodes;
        let mut visited = HashSet::new();

        while let Some(id) = stack.pop() {
            if id == candidate_id {
                return Ok(true);
            }
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(child) = self.tree.find_by_id(&id).await? {
                stack.extend(child.child_nodes);
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Paths
    // ------------------------------------------------------------------

    /// Slash-separated names from the root down to `id`. The root is `/`.
    pub async fn get_full_path(&self, id: &str) -> Result<String> {
        if id.trim().is_empty() {
            return Err(TreeError::invalid_argument("Cannot determine path of an empty node id"));
        }

        let mut segments = Vec::new();
        let mut visited = HashSet::new();
        let mut current = self.load(id).await?;

        while !self.is_root(current.id()) {
            if !visited.insert(current.id().to_string()) {
                return Err(TreeError::integrity_fault(format!(
                    "parent chain of {} loops at {}",
                    id,
                    current.id()
                )));
            }
            segments.push(current.node.name.clone());
            current = self.parent_of(current.id()).await?;
        }

        if segments.is_empty() {
            return Ok("/".to_string());
        }
        segments.reverse();
        Ok(format!("/{}", segments.join("/")))
    }

    /// Nodes at `path`.
    ///
    /// Every segment but the last must name a node that can hold children,
    /// so `/Top/Cfg/Snap` reaches a snapshot through its configuration. Any
    /// segment may match several nodes of different types (a folder and a
    /// configuration can share a name).
    pub async fn get_from_path(&self, path: &str) -> Result<Vec<Node>> {
        if path == "/" {
            return Ok(vec![self.get_root_node().await?]);
        }
        if !path.starts_with('/') || path.ends_with('/') {
            return Err(TreeError::invalid_argument(format!(
                "Path '{}' must start with '/' and must not end with '/'",
                path
            )));
        }

        let segments: Vec<&str> = path[1..].split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(TreeError::invalid_argument(format!("Path '{}' has an empty segment", path)));
        }
        let (last, folders) = match segments.split_last() {
            Some(split) => split,
            None => return Err(TreeError::invalid_argument("Path is empty")),
        };

        // A folder and a configuration may share a name, so every match is followed
        let mut frontier = vec![self.ensure_root().await?];
        for segment in folders {
            let mut next = Vec::new();
            for parent in &frontier {
                next.extend(
                    self.children_of(parent)
                        .await?
                        .into_iter()
                        .filter(|c| c.node.node_type.has_children() && c.node.name == *segment),
                );
            }
            if next.is_empty() {
                return Err(TreeError::node_not_found(path));
            }
            frontier = next;
        }

        let mut found = Vec::new();
        for parent in &frontier {
            found.extend(
                self.children_of(parent)
                    .await?
                    .into_iter()
                    .map(|c| c.node)
                    .filter(|n| n.name == *last),
            );
        }
        if found.is_empty() {
            return Err(TreeError::node_not_found(path));
        }
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    /// Every tag on every node, duplicates included
    pub async fn get_all_tags(&self) -> Result<Vec<Tag>> {
        let tagged = self.tree.search_by_tag(false).await?;
        Ok(tagged.into_iter().flat_map(|n| n.node.tags).collect())
    }

    pub async fn get_golden_snapshots(&self) -> Result<Vec<Node>> {
        let golden = self.tree.search_by_tag(true).await?;
        Ok(golden
            .into_iter()
            .map(|n| n.node)
            .filter(|n| n.node_type == NodeType::Snapshot)
            .collect())
    }

    /// Add `tag_data.tag` to each listed node.
    ///
    /// Best-effort: a node that cannot be tagged (missing, root, golden tag
    /// on a non-snapshot) is logged and skipped. Nodes that already carry a
    /// tag of that name are left unchanged. Returns the updated nodes.
    pub async fn add_tag(&self, tag_data: TagData) -> Result<Vec<Node>> {
        let TagData {
            mut tag,
            unique_node_ids,
        } = tag_data;
        if tag.name.trim().is_empty() {
            return Err(ValidationError::InvalidTag("tag name cannot be empty".to_string()).into());
        }
        if tag.created.is_none() {
            tag.created = Some(Utc::now());
        }

        let mut updated = Vec::new();
        for id in &unique_node_ids {
            let candidate = tag.clone();
            match self.retag(id, |node| node.add_tag(candidate)).await {
                Ok(Some(node)) => updated.push(node),
                Ok(None) => {}
                Err(e) => tracing::warn!("Cannot add tag '{}' to node {}: {}", tag.name, id, e),
            }
        }
        Ok(updated)
    }

    /// Remove the tag named `tag_data.tag.name` from each listed node.
    ///
    /// Best-effort like [`add_tag`](Self::add_tag); nodes without the tag are
    /// not updated and not returned.
    pub async fn delete_tag(&self, tag_data: TagData) -> Result<Vec<Node>> {
        let name = tag_data.tag.name;
        let mut updated = Vec::new();
        for id in &tag_data.unique_node_ids {
            match self.retag(id, |node| node.remove_tag(&name)).await {
                Ok(Some(node)) => updated.push(node),
                Ok(None) => {}
                Err(e) => tracing::warn!("Cannot delete tag '{}' from node {}: {}", name, id, e),
            }
        }
        Ok(updated)
    }

    /// Apply `change` to the tags of `id`; persists only when it reports a change
    async fn retag<F>(&self, id: &str, change: F) -> Result<Option<Node>>
    where
        F: FnOnce(&mut Node) -> bool,
    {
        let mut node = self.load(id).await?.node;
        if !change(&mut node) {
            return Ok(None);
        }
        let existing = self.check_update(&node).await?;
        let updated = self.persist_update(existing, node, false).await?;
        self.emit_event(DomainEvent::NodeUpdated(updated.clone()));
        Ok(Some(updated))
    }
}

/// Clone the payload stored under `from` into a new document under `to`
async fn clone_payload<T: PayloadDocument>(store: &PayloadStore<T>, from: &str, to: &str) -> Result<()> {
    let mut payload = store
        .find_by_id(from)
        .await?
        .ok_or_else(|| TreeError::payload_not_found(T::KIND.label(), from))?;
    payload.set_unique_id(to.to_string());
    store.save(payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDocumentStore;
    use crate::models::{ConfigPv, Configuration, Snapshot, SnapshotItem};

    fn create_test_dao() -> TreeDao {
        TreeDao::new(Arc::new(MemoryDocumentStore::new()), StoreConfig::default()).unwrap()
    }

    async fn folder(dao: &TreeDao, parent_id: &str, name: &str) -> Node {
        dao.create_node(parent_id, Node::new(name, NodeType::Folder, "user"))
            .await
            .unwrap()
    }

    async fn root_id(dao: &TreeDao) -> String {
        dao.get_root_node().await.unwrap().unique_id
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = StoreConfig {
            tree_index: String::new(),
            ..StoreConfig::default()
        };
        let result = TreeDao::new(Arc::new(MemoryDocumentStore::new()), config);
        assert!(matches!(result, Err(TreeError::InitializationError(_))));
    }

    #[tokio::test]
    async fn test_root_is_created_lazily_and_is_its_own_parent() {
        let dao = create_test_dao();
        let root = dao.get_root_node().await.unwrap();
        assert_eq!(root.unique_id, crate::config::ROOT_FOLDER_UNIQUE_ID);
        assert_eq!(root.node_type, NodeType::Folder);

        let parent = dao.get_parent_node(&root.unique_id).await.unwrap();
        assert_eq!(parent.unique_id, root.unique_id);
        assert_eq!(dao.get_full_path(&root.unique_id).await.unwrap(), "/");
    }

    #[tokio::test]
    async fn test_create_node_links_into_parent() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let top = folder(&dao, &root, "Top").await;

        assert!(!top.unique_id.is_empty());
        assert!(top.created.is_some());
        let children = dao.get_child_nodes(&root).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].unique_id, top.unique_id);
        assert_eq!(dao.get_parent_node(&top.unique_id).await.unwrap().unique_id, root);
    }

    #[tokio::test]
    async fn test_create_node_keeps_supplied_id_and_created() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let created = chrono::DateTime::parse_from_rfc3339("2019-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut node = Node::new("Migrated", NodeType::Folder, "user");
        node.unique_id = "legacy-id".to_string();
        node.created = Some(created);

        let saved = dao.create_node(&root, node.clone()).await.unwrap();
        assert_eq!(saved.unique_id, "legacy-id");
        assert_eq!(saved.created, Some(created));

        // Same id a second time is a conflict even under another name
        node.name = "Other".to_string();
        let err = dao.create_node(&root, node).await.unwrap_err();
        assert_eq!(err.kind(), crate::services::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_create_node_keeps_supplied_last_modified() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let created = chrono::DateTime::parse_from_rfc3339("2018-03-10T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let modified = chrono::DateTime::parse_from_rfc3339("2020-11-02T17:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut node = Node::new("Replayed", NodeType::Folder, "user");
        node.created = Some(created);
        node.last_modified = Some(modified);

        let saved = dao.create_node(&root, node).await.unwrap();
        assert_eq!(saved.created, Some(created));
        assert_eq!(saved.last_modified, Some(modified));
        let stored = dao.get_node(&saved.unique_id).await.unwrap();
        assert_eq!(stored.last_modified, Some(modified));

        // Fresh nodes still get a current timestamp
        let fresh = folder(&dao, &root, "Fresh").await;
        assert!(fresh.last_modified > Some(modified));
    }

    #[tokio::test]
    async fn test_create_node_rejects_unknown_parent_and_empty_owner() {
        let dao = create_test_dao();
        let err = dao
            .create_node("missing", Node::new("f", NodeType::Folder, "user"))
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::NodeNotFound { .. }));

        let root = root_id(&dao).await;
        let err = dao
            .create_node(&root, Node::new("f", NodeType::Folder, " "))
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_composite_snapshot_not_allowed_in_root() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let err = dao
            .create_node(&root, Node::new("c", NodeType::CompositeSnapshot, "user"))
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::InvalidArgument(_)));

        let top = folder(&dao, &root, "Top").await;
        assert!(dao
            .create_node(&top.unique_id, Node::new("c", NodeType::CompositeSnapshot, "user"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_update_node_renames_and_checks_siblings() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let a = folder(&dao, &root, "A").await;
        folder(&dao, &root, "B").await;

        let mut renamed = a.clone();
        renamed.name = "B".to_string();
        let err = dao.update_node(renamed, false).await.unwrap_err();
        assert!(matches!(err, TreeError::Conflict(_)));

        let mut renamed = a.clone();
        renamed.name = "A2".to_string();
        renamed.description = Some("renamed".to_string());
        let updated = dao.update_node(renamed, false).await.unwrap();
        assert_eq!(updated.name, "A2");
        assert_eq!(updated.created, a.created);
        assert!(updated.last_modified >= a.last_modified);
    }

    #[tokio::test]
    async fn test_update_node_rejects_type_change_and_root() {
        let dao = create_test_dao();
        let root = dao.get_root_node().await.unwrap();
        let err = dao.update_node(root.clone(), false).await.unwrap_err();
        assert!(matches!(err, TreeError::InvalidArgument(_)));

        let a = folder(&dao, &root.unique_id, "A").await;
        let mut changed = a.clone();
        changed.node_type = NodeType::Configuration;
        let err = dao.update_node(changed, false).await.unwrap_err();
        assert!(matches!(err, TreeError::InvalidArgument(_)));

        let mut ghost = a;
        ghost.unique_id = "ghost".to_string();
        let err = dao.update_node(ghost, false).await.unwrap_err();
        assert!(matches!(err, TreeError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_node_migration_flag_resets_created() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let a = folder(&dao, &root, "A").await;

        let updated = dao.update_node(a.clone(), true).await.unwrap();
        assert!(updated.created >= a.last_modified);

        let kept = dao.update_node(updated.clone(), false).await.unwrap();
        assert_eq!(kept.created, updated.created);
    }

    #[tokio::test]
    async fn test_is_contained_in_subtree() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let a = folder(&dao, &root, "A").await;
        let b = folder(&dao, &a.unique_id, "B").await;
        let c = folder(&dao, &b.unique_id, "C").await;
        let other = folder(&dao, &root, "Other").await;

        assert!(dao.is_contained_in_subtree(&a.unique_id, &c.unique_id).await.unwrap());
        assert!(!dao.is_contained_in_subtree(&c.unique_id, &a.unique_id).await.unwrap());
        assert!(!dao.is_contained_in_subtree(&a.unique_id, &other.unique_id).await.unwrap());
        assert!(dao.is_contained_in_subtree("missing", &a.unique_id).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_nodes_nested_ids_are_deleted_once() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let a = folder(&dao, &root, "A").await;
        let b = folder(&dao, &a.unique_id, "B").await;

        dao.delete_nodes(&[b.unique_id.clone(), a.unique_id.clone()])
            .await
            .unwrap();
        assert!(dao.get_node(&a.unique_id).await.is_err());
        assert!(dao.get_node(&b.unique_id).await.is_err());
        assert!(dao.get_child_nodes(&root).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_nodes_validates_all_before_deleting() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let a = folder(&dao, &root, "A").await;

        let err = dao
            .delete_nodes(&[a.unique_id.clone(), "missing".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, TreeError::NodeNotFound { .. }));
        assert!(dao.get_node(&a.unique_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_parent_node_of_unlinked_node_is_integrity_fault() {
        let dao = create_test_dao();
        dao.get_root_node().await.unwrap();
        let orphan = dao
            .tree
            .save(TreeNode::new(Node::new("orphan", NodeType::Folder, "user")))
            .await
            .unwrap();

        let err = dao.get_parent_node(orphan.id()).await.unwrap_err();
        assert_eq!(err.kind(), crate::services::ErrorKind::IntegrityFault);

        let err = dao.get_parent_node("missing").await.unwrap_err();
        assert_eq!(err.kind(), crate::services::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_get_from_path_rejects_malformed_paths() {
        let dao = create_test_dao();
        for path in ["Top", "/Top/", "/Top//Cfg", ""] {
            let err = dao.get_from_path(path).await.unwrap_err();
            assert!(matches!(err, TreeError::InvalidArgument(_)), "path {:?}", path);
        }
        let err = dao.get_from_path("/Nowhere").await.unwrap_err();
        assert!(matches!(err, TreeError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_from_path_returns_folder_and_configuration_with_same_name() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let top = folder(&dao, &root, "Top").await;
        folder(&dao, &top.unique_id, "Beam").await;
        dao.create_configuration(
            &top.unique_id,
            Configuration::new("Beam", "user", vec![ConfigPv::new("sys:beam")]),
        )
        .await
        .unwrap();

        let found = dao.get_from_path("/Top/Beam").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|n| n.node_type == NodeType::Folder));
        assert!(found.iter().any(|n| n.node_type == NodeType::Configuration));
    }

    #[tokio::test]
    async fn test_get_from_path_descends_through_folder_and_configuration_with_same_name() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let top = folder(&dao, &root, "Top").await;
        let beam = folder(&dao, &top.unique_id, "Beam").await;
        folder(&dao, &beam.unique_id, "Run").await;
        let cfg = dao
            .create_configuration(
                &top.unique_id,
                Configuration::new("Beam", "user", vec![ConfigPv::new("sys:beam")]),
            )
            .await
            .unwrap()
            .configuration_node;
        let snapshot = dao
            .save_snapshot(
                &cfg.unique_id,
                Snapshot::new(
                    "Run",
                    "user",
                    vec![SnapshotItem::new(ConfigPv::new("sys:beam"), serde_json::json!(1.5))],
                ),
            )
            .await
            .unwrap()
            .snapshot_node;

        let found = dao.get_from_path("/Top/Beam/Run").await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|n| n.node_type == NodeType::Folder));
        assert!(found.iter().any(|n| n.unique_id == snapshot.unique_id));

        // Snapshots hold no children
        let err = dao.get_from_path("/Top/Beam/Run/Deeper").await.unwrap_err();
        assert!(matches!(err, TreeError::NodeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_snapshots_requires_configuration() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let top = folder(&dao, &root, "Top").await;
        let err = dao.get_snapshots(&top.unique_id).await.unwrap_err();
        assert!(matches!(err, TreeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_events_emitted_for_create_update_delete() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        let mut rx = dao.subscribe_to_events();

        let a = folder(&dao, &root, "A").await;
        let mut renamed = a.clone();
        renamed.name = "A2".to_string();
        dao.update_node(renamed, false).await.unwrap();
        dao.delete_node(&a.unique_id).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), DomainEvent::NodeAdded(n) if n.unique_id == a.unique_id));
        assert!(matches!(rx.recv().await.unwrap(), DomainEvent::NodeUpdated(n) if n.name == "A2"));
        assert!(matches!(rx.recv().await.unwrap(), DomainEvent::NodeRemoved(id) if id == a.unique_id));
    }

    #[tokio::test]
    async fn test_failed_operation_emits_nothing() {
        let dao = create_test_dao();
        let root = root_id(&dao).await;
        folder(&dao, &root, "A").await;
        let mut rx = dao.subscribe_to_events();

        assert!(dao
            .create_node(&root, Node::new("A", NodeType::Folder, "user"))
            .await
            .is_err());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
