//! Payload Stores
//!
//! One store per payload type, each keyed by the owning node's unique id.
//! The three stores share a single generic implementation; the aliases give
//! them their domain names.

use crate::db::document_store::DocumentStore;
use crate::db::DatabaseError;
use crate::models::{CompositeSnapshotData, ConfigurationData, PayloadDocument, SnapshotData};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

type Result<T> = std::result::Result<T, DatabaseError>;

pub struct PayloadStore<T: PayloadDocument> {
    store: Arc<dyn DocumentStore>,
    index: String,
    _marker: PhantomData<fn() -> T>,
}

pub type ConfigurationDataStore = PayloadStore<ConfigurationData>;
pub type SnapshotDataStore = PayloadStore<SnapshotData>;
pub type CompositeSnapshotDataStore = PayloadStore<CompositeSnapshotData>;

impl<T: PayloadDocument> Clone for PayloadStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            index: self.index.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: PayloadDocument> PayloadStore<T> {
    pub fn new(store: Arc<dyn DocumentStore>, index: impl Into<String>) -> Self {
        Self {
            store,
            index: index.into(),
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Upsert a payload under its unique id and return the stored value
    pub async fn save(&self, payload: T) -> Result<T> {
        let id = payload.unique_id().to_string();
        if id.is_empty() {
            return Err(DatabaseError::operation_failed(format!(
                "{:?} payload has no owning node id",
                T::KIND
            )));
        }
        let doc = serde_json::to_value(&payload)?;
        self.store
            .put(&self.index, &id, doc)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("save {:?} payload {}", T::KIND, id), e))?;
        Ok(payload)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<T>> {
        let doc = self
            .store
            .get(&self.index, id)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("get {:?} payload {}", T::KIND, id), e))?;
        doc.map(decode).transpose()
    }

    pub async fn exists_by_id(&self, id: &str) -> Result<bool> {
        self.store
            .exists(&self.index, id)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("check {:?} payload {}", T::KIND, id), e))
    }

    pub async fn find_all(&self) -> Result<Vec<T>> {
        let docs = self
            .store
            .all(&self.index)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("list {:?} payloads", T::KIND), e))?;
        docs.into_iter().map(decode).collect()
    }

    /// Returns whether the payload existed
    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        self.store
            .delete(&self.index, id)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("delete {:?} payload {}", T::KIND, id), e))
    }

    pub async fn delete_all(&self) -> Result<()> {
        self.store
            .clear(&self.index)
            .await
            .map_err(|e| DatabaseError::from_store(&format!("delete all {:?} payloads", T::KIND), e))
    }
}

fn decode<T: PayloadDocument>(doc: Value) -> Result<T> {
    Ok(serde_json::from_value(doc)?)
}
