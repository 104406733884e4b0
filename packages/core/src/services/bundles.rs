//! Payload Bundles
//!
//! Entry points that create or update a node together with its payload
//! document: configurations, snapshots and composite snapshots.
//!
//! # Write protocol
//!
//! The node and its payload are separate documents. A create runs as:
//!
//! 1. validate the node against its parent (no writes)
//! 2. fix the node id, generating one if absent
//! 3. write the payload under that id
//! 4. write the node and link it into the parent
//!
//! Each completed write pushes its undo onto a [`Compensation`] list. When a
//! later step fails the list is unwound in reverse and the original error is
//! returned. Updates follow the same shape, with the undo restoring the
//! previous payload.

use crate::db::{DomainEvent, PayloadStore};
use crate::models::{
    CompositeSnapshot, CompositeSnapshotData, Configuration, ConfigurationData, Node, NodeType,
    PayloadDocument, Snapshot, SnapshotData, SnapshotItem,
};
use crate::services::error::TreeError;
use crate::services::tree_dao::TreeDao;
use std::collections::HashMap;
use uuid::Uuid;

type Result<T> = std::result::Result<T, TreeError>;

enum Undo<T> {
    DeletePayload(String),
    RestorePayload(T),
}

/// Undo actions for the payload writes of one bundle operation
struct Compensation<T: PayloadDocument> {
    actions: Vec<Undo<T>>,
}

impl<T: PayloadDocument> Compensation<T> {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    fn push(&mut self, action: Undo<T>) {
        self.actions.push(action);
    }

    /// Run the recorded undo actions, newest first.
    ///
    /// Failures are logged and do not mask the error that triggered the unwind.
    async fn unwind(self, store: &PayloadStore<T>) {
        for action in self.actions.into_iter().rev() {
            let (id, outcome) = match action {
                Undo::DeletePayload(id) => {
                    let outcome = store.delete_by_id(&id).await.map(|_| ());
                    (id, outcome)
                }
                Undo::RestorePayload(previous) => {
                    let id = previous.unique_id().to_string();
                    (id, store.save(previous).await.map(|_| ()))
                }
            };
            match outcome {
                Ok(()) => tracing::warn!("Compensated {} payload write for node {}", T::KIND.label(), id),
                Err(e) => tracing::error!(
                    "Compensation of {} payload write for node {} failed: {}",
                    T::KIND.label(),
                    id,
                    e
                ),
            }
        }
    }
}

/// Outcome of walking composite snapshot references
#[derive(Debug, Default)]
struct ReferenceWalk {
    /// SNAPSHOT ids reached, in reference order (repeats kept)
    snapshot_ids: Vec<String>,

    /// COMPOSITE_SNAPSHOT ids expanded, each listed once
    composite_ids: Vec<String>,

    /// Referenced ids that are missing or of an unsupported type
    rejected: Vec<String>,
}

impl TreeDao {
    /// Create payload + node under `parent_id` with compensation on failure
    async fn write_bundle<T: PayloadDocument>(
        &self,
        store: &PayloadStore<T>,
        parent_id: &str,
        mut node: Node,
        mut payload: T,
    ) -> Result<(Node, T)> {
        let parent = self.check_create(parent_id, &node).await?;

        if node.unique_id.is_empty() {
            node.unique_id = Uuid::new_v4().to_string();
        }
        payload.set_unique_id(node.unique_id.clone());

        let mut compensation = Compensation::new();
        let payload = store.save(payload).await?;
        compensation.push(Undo::DeletePayload(node.unique_id.clone()));

        match self.insert_node(parent, node).await {
            Ok(created) => {
                tracing::info!(
                    "Created {} node '{}' ({}) in {}",
                    created.node_type,
                    created.name,
                    created.unique_id,
                    parent_id
                );
                self.emit_event(DomainEvent::NodeAdded(created.clone()));
                Ok((created, payload))
            }
            Err(e) => {
                compensation.unwind(store).await;
                Err(e)
            }
        }
    }

    /// Replace payload + node metadata with compensation on failure
    async fn rewrite_bundle<T: PayloadDocument>(
        &self,
        store: &PayloadStore<T>,
        node: Node,
        mut payload: T,
    ) -> Result<(Node, T)> {
        let existing = self.check_update(&node).await?;
        payload.set_unique_id(node.unique_id.clone());

        let previous = store.find_by_id(&node.unique_id).await?;
        let mut compensation = Compensation::new();
        let payload = store.save(payload).await?;
        compensation.push(match previous {
            Some(previous) => Undo::RestorePayload(previous),
            None => Undo::DeletePayload(node.unique_id.clone()),
        });

        match self.persist_update(existing, node, false).await {
            Ok(updated) => {
                tracing::info!("Updated {} node '{}' ({})", updated.node_type, updated.name, updated.unique_id);
                self.emit_event(DomainEvent::NodeUpdated(updated.clone()));
                Ok((updated, payload))
            }
            Err(e) => {
                compensation.unwind(store).await;
                Err(e)
            }
        }
    }

    /// Stored node of type `expected` with the caller-editable fields of
    /// `incoming` applied
    async fn merge_editable(&self, incoming: &Node, expected: NodeType, with_owner: bool) -> Result<Node> {
        let mut node = self.load(&incoming.unique_id).await?.node;
        if node.node_type != expected {
            return Err(TreeError::invalid_argument(format!(
                "Node {} is a {} node, not {}",
                node.unique_id, node.node_type, expected
            )));
        }
        node.name = incoming.name.clone();
        node.description = incoming.description.clone();
        if with_owner {
            node.user_name = incoming.user_name.clone();
        }
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Configurations
    // ------------------------------------------------------------------

    /// Create a configuration node and its PV list under a folder.
    ///
    /// Repeated PV names are dropped (first occurrence wins).
    pub async fn create_configuration(&self, parent_id: &str, configuration: Configuration) -> Result<Configuration> {
        let Configuration {
            mut configuration_node,
            configuration_data,
        } = configuration;
        configuration_node.node_type = NodeType::Configuration;

        let (node, data) = self
            .write_bundle(
                &self.configurations,
                parent_id,
                configuration_node,
                configuration_data.dedup_pv_names(),
            )
            .await?;
        Ok(Configuration {
            configuration_node: node,
            configuration_data: data,
        })
    }

    /// Replace the PV list and the name, description and owner of a configuration
    pub async fn update_configuration(&self, configuration: Configuration) -> Result<Configuration> {
        let node = self
            .merge_editable(&configuration.configuration_node, NodeType::Configuration, true)
            .await?;
        let (node, data) = self
            .rewrite_bundle(
                &self.configurations,
                node,
                configuration.configuration_data.dedup_pv_names(),
            )
            .await?;
        Ok(Configuration {
            configuration_node: node,
            configuration_data: data,
        })
    }

    pub async fn get_configuration_data(&self, id: &str) -> Result<ConfigurationData> {
        let data = self
            .configurations
            .find_by_id(id)
            .await?
            .ok_or_else(|| TreeError::payload_not_found(ConfigurationData::KIND.label(), id))?;
        Ok(data.dedup_pv_names())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Create a snapshot node and its captured values under a configuration.
    ///
    /// Repeated items for the same PV are dropped (first occurrence wins).
    pub async fn save_snapshot(&self, parent_id: &str, snapshot: Snapshot) -> Result<Snapshot> {
        let Snapshot {
            mut snapshot_node,
            snapshot_data,
        } = snapshot;
        snapshot_node.node_type = NodeType::Snapshot;

        let (node, data) = self
            .write_bundle(&self.snapshots, parent_id, snapshot_node, snapshot_data.dedup_items())
            .await?;
        Ok(Snapshot {
            snapshot_node: node,
            snapshot_data: data,
        })
    }

    /// Replace a snapshot's values and metadata (tags included)
    pub async fn update_snapshot(&self, snapshot: Snapshot) -> Result<Snapshot> {
        let Snapshot {
            mut snapshot_node,
            snapshot_data,
        } = snapshot;
        snapshot_node.node_type = NodeType::Snapshot;

        let (node, data) = self
            .rewrite_bundle(&self.snapshots, snapshot_node, snapshot_data.dedup_items())
            .await?;
        Ok(Snapshot {
            snapshot_node: node,
            snapshot_data: data,
        })
    }

    pub async fn get_snapshot_data(&self, id: &str) -> Result<SnapshotData> {
        let data = self
            .snapshots
            .find_by_id(id)
            .await?
            .ok_or_else(|| TreeError::payload_not_found(SnapshotData::KIND.label(), id))?;
        Ok(data.dedup_items())
    }

    // ------------------------------------------------------------------
    // Composite snapshots
    // ------------------------------------------------------------------

    /// Create a composite snapshot under a non-root folder.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if a reference is missing or not a (composite)
    ///   snapshot, or the referenced snapshots share PV names
    /// - `CycleRejected` if the references lead back to the node itself
    pub async fn create_composite_snapshot(
        &self,
        parent_id: &str,
        composite_snapshot: CompositeSnapshot,
    ) -> Result<CompositeSnapshot> {
        let CompositeSnapshot {
            mut composite_snapshot_node,
            composite_snapshot_data,
        } = composite_snapshot;
        composite_snapshot_node.node_type = NodeType::CompositeSnapshot;

        self.check_composite_references(
            &composite_snapshot_node.unique_id,
            &composite_snapshot_data.referenced_snapshot_nodes,
        )
        .await?;

        let (node, data) = self
            .write_bundle(
                &self.composites,
                parent_id,
                composite_snapshot_node,
                composite_snapshot_data,
            )
            .await?;
        Ok(CompositeSnapshot {
            composite_snapshot_node: node,
            composite_snapshot_data: data,
        })
    }

    /// Replace the references, name and description of a composite snapshot
    pub async fn update_composite_snapshot(&self, composite_snapshot: CompositeSnapshot) -> Result<CompositeSnapshot> {
        let node = self
            .merge_editable(
                &composite_snapshot.composite_snapshot_node,
                NodeType::CompositeSnapshot,
                false,
            )
            .await?;
        self.check_composite_references(
            &node.unique_id,
            &composite_snapshot.composite_snapshot_data.referenced_snapshot_nodes,
        )
        .await?;

        let (node, data) = self
            .rewrite_bundle(
                &self.composites,
                node,
                composite_snapshot.composite_snapshot_data,
            )
            .await?;
        Ok(CompositeSnapshot {
            composite_snapshot_node: node,
            composite_snapshot_data: data,
        })
    }

    pub async fn get_composite_snapshot_data(&self, id: &str) -> Result<CompositeSnapshotData> {
        self.composites
            .find_by_id(id)
            .await?
            .ok_or_else(|| TreeError::payload_not_found(CompositeSnapshotData::KIND.label(), id))
    }

    pub async fn get_all_composite_snapshot_data(&self) -> Result<Vec<CompositeSnapshotData>> {
        Ok(self.composites.find_all().await?)
    }

    /// Whether every reference (recursively through nested composites)
    /// resolves to a SNAPSHOT or COMPOSITE_SNAPSHOT node
    pub async fn check_composite_snapshot_referenced_node_types(
        &self,
        composite_snapshot: &CompositeSnapshot,
    ) -> Result<bool> {
        let walk = self
            .walk_references(&composite_snapshot.composite_snapshot_data.referenced_snapshot_nodes)
            .await?;
        Ok(walk.rejected.is_empty())
    }

    /// PV names occurring more than once across the referenced snapshots.
    ///
    /// Each duplicate is reported once, in order of first appearance.
    pub async fn check_for_pv_name_duplicates(&self, snapshot_ids: &[String]) -> Result<Vec<String>> {
        let walk = self.walk_references(snapshot_ids).await?;

        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order = Vec::new();
        for id in &walk.snapshot_ids {
            for item in self.get_snapshot_data(id).await?.snapshot_items {
                let count = counts.entry(item.config_pv.pv_name.clone()).or_insert(0);
                *count += 1;
                if *count == 2 {
                    order.push(item.config_pv.pv_name);
                }
            }
        }
        Ok(order)
    }

    /// All snapshot items reachable from a composite snapshot, flattened
    pub async fn get_snapshot_items_from_composite_snapshot(&self, id: &str) -> Result<Vec<SnapshotItem>> {
        let start = [self.load(id).await?.node.unique_id];
        let walk = self.walk_references(&start).await?;

        let mut items = Vec::new();
        for snapshot_id in &walk.snapshot_ids {
            items.extend(self.get_snapshot_data(snapshot_id).await?.snapshot_items);
        }
        Ok(items)
    }

    /// Validate the references a composite snapshot `owner_id` is about to store
    async fn check_composite_references(&self, owner_id: &str, references: &[String]) -> Result<()> {
        let walk = self.walk_references(references).await?;

        if !owner_id.is_empty() && walk.composite_ids.iter().any(|c| c == owner_id) {
            return Err(TreeError::cycle_rejected(format!(
                "composite snapshot {} would reference itself",
                owner_id
            )));
        }
        if !walk.rejected.is_empty() {
            return Err(TreeError::invalid_argument(format!(
                "Found unsupported node type in list of referenced nodes: {}",
                walk.rejected.join(", ")
            )));
        }

        let duplicates = self.check_for_pv_name_duplicates(references).await?;
        if !duplicates.is_empty() {
            return Err(TreeError::invalid_argument(format!(
                "Found duplicate PV names in referenced snapshots: {}",
                duplicates.join(", ")
            )));
        }
        Ok(())
    }

    /// Depth-first walk over composite references.
    ///
    /// A composite reached along several paths is expanded on each of them,
    /// so snapshots shared through repeated or diamond references count
    /// every time. Expansion stops only where a composite already sits on
    /// its own path, which ends stored reference cycles.
    async fn walk_references(&self, references: &[String]) -> Result<ReferenceWalk> {
        let mut walk = ReferenceWalk::default();
        // (id, composites on the path leading to it)
        let mut stack: Vec<(String, Vec<String>)> =
            references.iter().rev().map(|id| (id.clone(), Vec::new())).collect();

        while let Some((id, path)) = stack.pop() {
            let node = match self.tree.find_by_id(&id).await? {
                Some(tree_node) => tree_node.node,
                None => {
                    walk.rejected.push(id);
                    continue;
                }
            };

            match node.node_type {
                NodeType::Snapshot => walk.snapshot_ids.push(id),
                NodeType::CompositeSnapshot => {
                    if path.contains(&id) {
                        tracing::warn!("Composite snapshot {} references itself via {:?}", id, path);
                        continue;
                    }
                    let data = self.get_composite_snapshot_data(&id).await?;
                    let mut child_path = path;
                    child_path.push(id.clone());
                    stack.extend(
                        data.referenced_snapshot_nodes
                            .into_iter()
                            .rev()
                            .map(|child| (child, child_path.clone())),
                    );
                    if !walk.composite_ids.contains(&id) {
                        walk.composite_ids.push(id);
                    }
                }
                NodeType::Folder | NodeType::Configuration => walk.rejected.push(id),
            }
        }

        Ok(walk)
    }
}
