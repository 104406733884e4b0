//! Store configuration
//!
//! `StoreConfig` names the document-store indices used by the tree and the
//! payload stores, and fixes the identity of the root folder. Defaults match
//! the index layout of existing save-and-restore deployments, so a store
//! written by an earlier service can be opened unchanged.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Well-known id of the root folder
pub const ROOT_FOLDER_UNIQUE_ID: &str = "44bef5de-e8e6-4014-af37-b8f6c8a939a2";

/// Environment variable prefix for overrides, e.g. `SAVERESTORE_TREE_INDEX`
pub const ENV_PREFIX: &str = "SAVERESTORE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Index holding `TreeNode` documents
    pub tree_index: String,

    /// Index holding `ConfigurationData` documents
    pub configuration_index: String,

    /// Index holding `SnapshotData` documents
    pub snapshot_index: String,

    /// Index holding `CompositeSnapshotData` documents
    pub composite_snapshot_index: String,

    pub root_node_id: String,

    pub root_node_name: String,

    /// Owner recorded on the lazily created root folder
    pub root_user_name: String,

    /// Directory for the file-backed store (None = in-memory only)
    pub data_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tree_index: "saveandrestore_tree_v2".to_string(),
            configuration_index: "saveandrestore_configuration".to_string(),
            snapshot_index: "saveandrestore_snapshot".to_string(),
            composite_snapshot_index: "saveandrestore_composite_snapshot".to_string(),
            root_node_id: ROOT_FOLDER_UNIQUE_ID.to_string(),
            root_node_name: "Root folder".to_string(),
            root_user_name: "anonymous".to_string(),
            data_dir: None,
        }
    }
}

impl StoreConfig {
    /// Defaults overlaid with `SAVERESTORE_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup` (keys include the prefix)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

        if let Some(v) = var("TREE_INDEX") {
            config.tree_index = v;
        }
        if let Some(v) = var("CONFIGURATION_INDEX") {
            config.configuration_index = v;
        }
        if let Some(v) = var("SNAPSHOT_INDEX") {
            config.snapshot_index = v;
        }
        if let Some(v) = var("COMPOSITE_SNAPSHOT_INDEX") {
            config.composite_snapshot_index = v;
        }
        if let Some(v) = var("ROOT_NODE_ID") {
            config.root_node_id = v;
        }
        if let Some(v) = var("ROOT_NODE_NAME") {
            config.root_node_name = v;
        }
        if let Some(v) = var("ROOT_USER_NAME") {
            config.root_user_name = v;
        }
        if let Some(v) = var("DATA_DIR") {
            config.data_dir = Some(PathBuf::from(v));
        }
        config
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let indices = [
            ("tree_index", &self.tree_index),
            ("configuration_index", &self.configuration_index),
            ("snapshot_index", &self.snapshot_index),
            ("composite_snapshot_index", &self.composite_snapshot_index),
        ];

        let mut seen = HashSet::new();
        for (field, name) in indices {
            if name.trim().is_empty() {
                return Err(format!("{} cannot be empty", field));
            }
            if !seen.insert(name.as_str()) {
                return Err(format!("{} '{}' is used by more than one store", field, name));
            }
        }

        if self.root_node_id.trim().is_empty() {
            return Err("root_node_id cannot be empty".to_string());
        }
        if self.root_node_name.trim().is_empty() {
            return Err("root_node_name cannot be empty".to_string());
        }

        Ok(())
    }
}
