//! MemoryDocumentStore - In-Process DocumentStore Implementation
//!
//! Keeps every index as an ordered map of id to JSON document behind a tokio
//! `RwLock`. Searches are full scans of the index, which matches the cost
//! model the tree repository assumes for reverse-parent lookups.
//!
//! Used directly by tests and benchmarks, and as the in-memory layer of
//! [`crate::db::FileDocumentStore`].

use crate::db::document_store::{field_exists, field_matches, DocumentStore};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

pub(crate) type Index = BTreeMap<String, Value>;

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    indices: RwLock<HashMap<String, Index>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in an index (0 for an unknown index)
    pub async fn len(&self, index: &str) -> usize {
        self.indices
            .read()
            .await
            .get(index)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, index: &str) -> bool {
        self.len(index).await == 0
    }

    /// Replace an index wholesale (used when loading from disk)
    pub(crate) async fn load_index(&self, index: &str, docs: Index) {
        self.indices.write().await.insert(index.to_string(), docs);
    }

    /// Copy of an index's current contents
    pub(crate) async fn index_snapshot(&self, index: &str) -> Index {
        self.indices
            .read()
            .await
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    async fn scan<F>(&self, index: &str, predicate: F) -> Vec<Value>
    where
        F: Fn(&Value) -> bool,
    {
        let guard = self.indices.read().await;
        match guard.get(index) {
            Some(docs) => docs.values().filter(|d| predicate(d)).cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>> {
        let guard = self.indices.read().await;
        Ok(guard.get(index).and_then(|docs| docs.get(id)).cloned())
    }

    async fn put(&self, index: &str, id: &str, doc: Value) -> Result<()> {
        if id.is_empty() {
            anyhow::bail!("refusing to store a document without id in index '{}'", index);
        }
        self.indices
            .write()
            .await
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn delete(&self, index: &str, id: &str) -> Result<bool> {
        let mut guard = self.indices.write().await;
        Ok(guard
            .get_mut(index)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn exists(&self, index: &str, id: &str) -> Result<bool> {
        let guard = self.indices.read().await;
        Ok(guard
            .get(index)
            .map(|docs| docs.contains_key(id))
            .unwrap_or(false))
    }

    async fn multi_get(&self, index: &str, ids: &[String]) -> Result<Vec<Value>> {
        let guard = self.indices.read().await;
        let Some(docs) = guard.get(index) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| docs.get(id)).cloned().collect())
    }

    async fn search_by_field(&self, index: &str, field: &str, value: &str) -> Result<Vec<Value>> {
        Ok(self
            .scan(index, |doc| field_matches(doc, field, value))
            .await)
    }

    async fn search_exists(&self, index: &str, field: &str) -> Result<Vec<Value>> {
        Ok(self.scan(index, |doc| field_exists(doc, field)).await)
    }

    async fn all(&self, index: &str) -> Result<Vec<Value>> {
        Ok(self.scan(index, |_| true).await)
    }

    async fn clear(&self, index: &str) -> Result<()> {
        self.indices.write().await.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryDocumentStore::new();
        store.put("idx", "a", json!({"v": 1})).await.unwrap();

        assert!(store.exists("idx", "a").await.unwrap());
        assert_eq!(store.get("idx", "a").await.unwrap(), Some(json!({"v": 1})));
        assert!(store.delete("idx", "a").await.unwrap());
        assert!(!store.delete("idx", "a").await.unwrap());
        assert_eq!(store.get("idx", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_indices_are_isolated() {
        let store = MemoryDocumentStore::new();
        store.put("one", "a", json!({})).await.unwrap();

        assert!(!store.exists("two", "a").await.unwrap());
        assert_eq!(store.len("one").await, 1);
        assert!(store.is_empty("two").await);
    }

    #[tokio::test]
    async fn test_multi_get_omits_missing() {
        let store = MemoryDocumentStore::new();
        store.put("idx", "a", json!({"id": "a"})).await.unwrap();
        store.put("idx", "c", json!({"id": "c"})).await.unwrap();

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let docs = store.multi_get("idx", &ids).await.unwrap();
        assert_eq!(docs, vec![json!({"id": "a"}), json!({"id": "c"})]);
    }

    #[tokio::test]
    async fn test_search_and_clear() {
        let store = MemoryDocumentStore::new();
        store
            .put("idx", "p", json!({"childNodes": ["x", "y"]}))
            .await
            .unwrap();
        store.put("idx", "q", json!({"childNodes": []})).await.unwrap();

        assert_eq!(store.search_by_field("idx", "childNodes", "y").await.unwrap().len(), 1);
        assert_eq!(store.search_exists("idx", "childNodes").await.unwrap().len(), 1);
        assert_eq!(store.all("idx").await.unwrap().len(), 2);

        store.clear("idx").await.unwrap();
        assert!(store.all("idx").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_rejects_empty_id() {
        let store = MemoryDocumentStore::new();
        assert!(store.put("idx", "", json!({})).await.is_err());
    }
}
