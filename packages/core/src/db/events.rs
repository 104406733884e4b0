//! Domain Events for the Node Tree
//!
//! `TreeDao` emits these events after each successful mutation so that
//! observers (a websocket push layer, caches) can follow tree changes without
//! polling the store.
//!
//! # Architecture
//!
//! Events are emitted on a tokio broadcast channel, allowing multiple
//! subscribers. An event is sent only after every store write of the
//! operation succeeded; failed or partially applied operations emit nothing.

use crate::models::Node;
use serde::{Deserialize, Serialize};

/// Domain events emitted by `TreeDao`
///
/// Serialized as `{"messageType": "...", "payload": ...}` for push clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "messageType",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum DomainEvent {
    /// A node was created (directly, via a bundle write, or as a copy)
    NodeAdded(Node),

    /// A node's metadata changed, or its child list changed (move target)
    NodeUpdated(Node),

    /// A node and its payload were deleted
    NodeRemoved(String),
}

impl DomainEvent {
    pub fn event_type(&self) -> &str {
        match self {
            DomainEvent::NodeAdded(_) => "node:added",
            DomainEvent::NodeUpdated(_) => "node:updated",
            DomainEvent::NodeRemoved(_) => "node:removed",
        }
    }

    /// Id of the node the event is about
    pub fn node_id(&self) -> &str {
        match self {
            DomainEvent::NodeAdded(node) | DomainEvent::NodeUpdated(node) => &node.unique_id,
            DomainEvent::NodeRemoved(id) => id,
        }
    }
}
