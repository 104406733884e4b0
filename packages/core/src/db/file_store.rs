//! FileDocumentStore - Embedded, File-Backed DocumentStore
//!
//! Each index is persisted as one JSON object (`id -> document`) in
//! `<data_dir>/<index>.json`. All indices are loaded into a
//! [`MemoryDocumentStore`] on open; every mutation writes the touched index
//! back to disk before returning.
//!
//! Writes go to `<index>.json.tmp` first and are then renamed over the
//! previous file, so an interrupted write leaves the last complete version
//! in place.

use crate::db::document_store::DocumentStore;
use crate::db::memory_store::{Index, MemoryDocumentStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const INDEX_FILE_EXTENSION: &str = "json";

#[derive(Debug)]
pub struct FileDocumentStore {
    data_dir: PathBuf,
    inner: MemoryDocumentStore,
    /// Serializes file writes
    write_lock: Mutex<()>,
}

impl FileDocumentStore {
    /// Open (or create) a store rooted at `data_dir`
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let inner = MemoryDocumentStore::new();
        let mut entries = tokio::fs::read_dir(&data_dir)
            .await
            .with_context(|| format!("Failed to read data directory {}", data_dir.display()))?;

        let mut loaded = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(INDEX_FILE_EXTENSION) {
                continue;
            }
            let Some(index) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read index file {}", path.display()))?;
            let docs: Index = serde_json::from_slice(&bytes)
                .with_context(|| format!("Corrupt index file {}", path.display()))?;
            tracing::debug!("Loaded index '{}' with {} documents", index, docs.len());
            inner.load_index(index, docs).await;
            loaded += 1;
        }

        tracing::info!(
            "Opened file document store at {} ({} indices)",
            data_dir.display(),
            loaded
        );

        Ok(Self {
            data_dir,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn index_path(&self, index: &str) -> Result<PathBuf> {
        let valid = !index.is_empty()
            && index
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            anyhow::bail!("Index name '{}' is not usable as a file name", index);
        }
        Ok(self
            .data_dir
            .join(format!("{}.{}", index, INDEX_FILE_EXTENSION)))
    }

    /// Write the current contents of `index` to disk
    async fn persist(&self, index: &str) -> Result<()> {
        let path = self.index_path(index)?;
        let _guard = self.write_lock.lock().await;

        let docs = self.inner.index_snapshot(index).await;
        if docs.is_empty() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to remove {}", path.display()))
                }
            }
            return Ok(());
        }

        let bytes = serde_json::to_vec(&docs)?;
        let tmp_path = path.with_extension(format!("{}.tmp", INDEX_FILE_EXTENSION));
        tokio::fs::write(&tmp_path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn get(&self, index: &str, id: &str) -> Result<Option<Value>> {
        self.inner.get(index, id).await
    }

    async fn put(&self, index: &str, id: &str, doc: Value) -> Result<()> {
        self.index_path(index)?;
        self.inner.put(index, id, doc).await?;
        self.persist(index).await
    }

    async fn delete(&self, index: &str, id: &str) -> Result<bool> {
        let existed = self.inner.delete(index, id).await?;
        if existed {
            self.persist(index).await?;
        }
        Ok(existed)
    }

    async fn exists(&self, index: &str, id: &str) -> Result<bool> {
        self.inner.exists(index, id).await
    }

    async fn multi_get(&self, index: &str, ids: &[String]) -> Result<Vec<Value>> {
        self.inner.multi_get(index, ids).await
    }

    async fn search_by_field(&self, index: &str, field: &str, value: &str) -> Result<Vec<Value>> {
        self.inner.search_by_field(index, field, value).await
    }

    async fn search_exists(&self, index: &str, field: &str) -> Result<Vec<Value>> {
        self.inner.search_exists(index, field).await
    }

    async fn all(&self, index: &str) -> Result<Vec<Value>> {
        self.inner.all(index).await
    }

    async fn clear(&self, index: &str) -> Result<()> {
        self.inner.clear(index).await?;
        self.persist(index).await
    }
}
