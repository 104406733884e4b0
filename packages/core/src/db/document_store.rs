//! DocumentStore Trait - Persistence Abstraction Layer
//!
//! This module defines the `DocumentStore` trait, the narrow contract the
//! tree repository and payload stores consume. Any schema-less JSON document
//! store (embedded or remote) can back the save-and-restore core by
//! implementing it.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: all methods are async so network-backed stores fit the
//!    same contract as the embedded ones.
//! 2. **No transactions, no joins**: every call touches one index. Callers
//!    that update several documents do so step by step.
//! 3. **Error Handling**: uses `anyhow::Result`; the repository layer adds
//!    context and converts to `DatabaseError`.
//!
//! # Field paths
//!
//! Search fields are dotted paths into the document (`node.tags.name`).
//! Arrays are flattened at every step, so `childNodes` matches a document
//! whose child id list *contains* the searched value.
//!
//! # Examples
//!
//! ```rust
//! use saverestore_core::db::{DocumentStore, MemoryDocumentStore};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let store = MemoryDocumentStore::new();
//! store.put("tree", "a", json!({"childNodes": ["b", "c"]})).await?;
//!
//! let hits = store.search_by_field("tree", "childNodes", "c").await?;
//! assert_eq!(hits.len(), 1);
//! # Ok::<(), anyhow::Error>(())
//! # });
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Abstraction over a schema-less JSON document store
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so an `Arc<dyn DocumentStore>` can be
/// shared between request handlers.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Get a document by id. `Ok(None)` when it does not exist.
    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>>;

    /// Insert or replace the document stored under `id`
    async fn put(&self, index: &str, id: &str, doc: Value) -> Result<()>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, index: &str, id: &str) -> Result<bool>;

    async fn exists(&self, index: &str, id: &str) -> Result<bool>;

    /// Bulk fetch; ids that do not exist are silently omitted
    async fn multi_get(&self, index: &str, ids: &[String]) -> Result<Vec<Value>>;

    /// Documents where any value at `field` equals `value` (string comparison)
    async fn search_by_field(&self, index: &str, field: &str, value: &str) -> Result<Vec<Value>>;

    /// Documents with at least one non-null value at `field`
    async fn search_exists(&self, index: &str, field: &str) -> Result<Vec<Value>>;

    /// Every document of an index
    async fn all(&self, index: &str) -> Result<Vec<Value>>;

    /// Delete every document of an index
    async fn clear(&self, index: &str) -> Result<()>;
}

/// Collect the values found at a dotted `path`, flattening arrays on the way.
pub(crate) fn field_values<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&Value> = vec![doc];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for value in current {
            collect_segment(value, segment, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }

    // A leaf holding an array contributes its elements
    let mut leaves = Vec::new();
    for value in current {
        match value {
            Value::Array(items) => leaves.extend(items.iter()),
            other => leaves.push(other),
        }
    }
    leaves
}

fn collect_segment<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(segment) {
                out.push(v);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_segment(item, segment, out);
            }
        }
        _ => {}
    }
}

/// Whether any value at `path` matches `expected`
pub(crate) fn field_matches(doc: &Value, path: &str, expected: &str) -> bool {
    field_values(doc, path).into_iter().any(|v| match v {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        Value::Bool(b) => b.to_string() == expected,
        _ => false,
    })
}

/// Whether `path` resolves to at least one non-null value
pub(crate) fn field_exists(doc: &Value, path: &str) -> bool {
    field_values(doc, path).into_iter().any(|v| !v.is_null())
}
