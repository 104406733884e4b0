//! Payload Documents
//!
//! Type-specific data stored next to the tree, one document per owning node
//! and keyed by that node's unique id:
//!
//! - `ConfigurationData` - the ordered PV list of a configuration
//! - `SnapshotData` - the values captured for each PV of a configuration
//! - `CompositeSnapshotData` - ids of the snapshots a composite snapshot aggregates
//!
//! The `Configuration`, `Snapshot` and `CompositeSnapshot` bundles pair a node
//! with its payload for the create/update entry points.

use crate::models::{Node, NodeType, PayloadKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// A payload document that can be persisted by a [`crate::db::PayloadStore`].
pub trait PayloadDocument: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: PayloadKind;

    fn unique_id(&self) -> &str;

    fn set_unique_id(&mut self, unique_id: String);
}

/// Reference to a process variable within a configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPv {
    pub pv_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readback_pv_name: Option<String>,

    #[serde(default)]
    pub read_only: bool,
}

impl ConfigPv {
    pub fn new(pv_name: impl Into<String>) -> Self {
        Self {
            pv_name: pv_name.into(),
            readback_pv_name: None,
            read_only: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationData {
    #[serde(default)]
    pub unique_id: String,

    #[serde(default)]
    pub pv_list: Vec<ConfigPv>,
}

impl ConfigurationData {
    pub fn new(pv_list: Vec<ConfigPv>) -> Self {
        Self {
            unique_id: String::new(),
            pv_list,
        }
    }

    /// Drop repeated PV names, keeping the first occurrence and the list order
    pub fn dedup_pv_names(mut self) -> Self {
        let mut seen = HashSet::new();
        self.pv_list.retain(|pv| seen.insert(pv.pv_name.clone()));
        self
    }

    pub fn pv_names(&self) -> Vec<&str> {
        self.pv_list.iter().map(|pv| pv.pv_name.as_str()).collect()
    }
}

impl PayloadDocument for ConfigurationData {
    const KIND: PayloadKind = PayloadKind::Configuration;

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn set_unique_id(&mut self, unique_id: String) {
        self.unique_id = unique_id;
    }
}

/// Alarm status captured together with a value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueStatus {
    #[serde(default)]
    pub severity: String,

    #[serde(default)]
    pub status: String,
}

/// Value of one PV captured in a snapshot.
///
/// The value itself is kept as opaque JSON (scalar, array or structured
/// type); this layer never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotItem {
    pub config_pv: ConfigPv,

    #[serde(default)]
    pub value: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readback_value: Option<Value>,

    #[serde(default)]
    pub status: ValueStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl SnapshotItem {
    pub fn new(config_pv: ConfigPv, value: Value) -> Self {
        Self {
            config_pv,
            value,
            readback_value: None,
            status: ValueStatus::default(),
            timestamp: Some(chrono::Utc::now()),
        }
    }

    pub fn pv_name(&self) -> &str {
        &self.config_pv.pv_name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    #[serde(default)]
    pub unique_id: String,

    #[serde(default)]
    pub snapshot_items: Vec<SnapshotItem>,
}

impl SnapshotData {
    pub fn new(snapshot_items: Vec<SnapshotItem>) -> Self {
        Self {
            unique_id: String::new(),
            snapshot_items,
        }
    }

    /// Drop items whose PV name was already seen, keeping the first
    pub fn dedup_items(mut self) -> Self {
        let mut seen = HashSet::new();
        self.snapshot_items
            .retain(|item| seen.insert(item.config_pv.pv_name.clone()));
        self
    }
}

impl PayloadDocument for SnapshotData {
    const KIND: PayloadKind = PayloadKind::Snapshot;

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn set_unique_id(&mut self, unique_id: String) {
        self.unique_id = unique_id;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSnapshotData {
    #[serde(default)]
    pub unique_id: String,

    /// Ids of referenced SNAPSHOT or COMPOSITE_SNAPSHOT nodes
    #[serde(default)]
    pub referenced_snapshot_nodes: Vec<String>,
}

impl CompositeSnapshotData {
    /// Document field holding the referenced ids
    pub const REFERENCES_FIELD: &'static str = "referencedSnapshotNodes";

    pub fn new(referenced_snapshot_nodes: Vec<String>) -> Self {
        Self {
            unique_id: String::new(),
            referenced_snapshot_nodes,
        }
    }
}

impl PayloadDocument for CompositeSnapshotData {
    const KIND: PayloadKind = PayloadKind::CompositeSnapshot;

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn set_unique_id(&mut self, unique_id: String) {
        self.unique_id = unique_id;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub configuration_node: Node,
    pub configuration_data: ConfigurationData,
}

impl Configuration {
    pub fn new(name: impl Into<String>, user_name: impl Into<String>, pv_list: Vec<ConfigPv>) -> Self {
        Self {
            configuration_node: Node::new(name, NodeType::Configuration, user_name),
            configuration_data: ConfigurationData::new(pv_list),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub snapshot_node: Node,
    pub snapshot_data: SnapshotData,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, user_name: impl Into<String>, items: Vec<SnapshotItem>) -> Self {
        Self {
            snapshot_node: Node::new(name, NodeType::Snapshot, user_name),
            snapshot_data: SnapshotData::new(items),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeSnapshot {
    pub composite_snapshot_node: Node,
    pub composite_snapshot_data: CompositeSnapshotData,
}

impl CompositeSnapshot {
    pub fn new(
        name: impl Into<String>,
        user_name: impl Into<String>,
        referenced_snapshot_nodes: Vec<String>,
    ) -> Self {
        Self {
            composite_snapshot_node: Node::new(name, NodeType::CompositeSnapshot, user_name),
            composite_snapshot_data: CompositeSnapshotData::new(referenced_snapshot_nodes),
        }
    }
}
