// src/storage/file.rs

use crate::error::{PoolError, Result};
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Key-value store backed by a single JSON document on disk.
///
/// Writes go to a sibling temp file which is then renamed over the target, so a
/// crash mid-write leaves the previous document intact.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the document.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(PoolError::Io {
                operation: "read_store".to_string(),
                message: format!("{}: {e}", self.path.display()),
            }),
        }
    }

    async fn write_document(&self, document: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(document)?;
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| PoolError::Io {
                operation: "write_store".to_string(),
                message: format!("{}: {e}", tmp_path.display()),
            })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| PoolError::Io {
                operation: "rename_store".to_string(),
                message: format!("{}: {e}", self.path.display()),
            })?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    #[instrument(level = "debug", skip(self), fields(store.path = %self.path.display()))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        Ok(document.remove(key))
    }

    #[instrument(
        level = "debug",
        skip(self, value),
        fields(store.path = %self.path.display(), value.len = value.len())
    )]
    async fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        document.insert(key.to_string(), value);
        self.write_document(&document).await?;
        debug!("Persisted entry to JSON file store");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        let existed = document.remove(key).is_some();
        if existed {
            self.write_document(&document).await?;
        }
        Ok(existed)
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
