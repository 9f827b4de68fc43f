//! Persistent key-value storage.
//!
//! Values are opaque text. [`FileStore`] keeps every key in one JSON document
//! with restricted permissions (0600); [`MemoryStore`] is process-local.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Async text key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns `None` for unset keys.
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Deleting an unset key is not an error.
    async fn delete_item(&self, key: &str) -> Result<()>;
}

type Entries = BTreeMap<String, String>;

/// JSON-file-backed store.
///
/// Every write rewrites the whole document through a temp file and rename.
/// The mutex serializes read-modify-write cycles within the process.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(&self) -> Result<Entries> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read store from {}", self.path.display())
                });
            }
        };

        if contents.trim().is_empty() {
            return Ok(Entries::new());
        }

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse store from {}", self.path.display()))
    }

    async fn write_entries(&self, entries: &Entries) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(entries).context("Failed to serialize store")?;
        let tmp_path = self.path.with_extension("json.tmp");

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&tmp_path)
            .await
            .with_context(|| format!("Failed to open {} for writing", tmp_path.display()))?;
        file.write_all(contents.as_bytes())
            .await
            .with_context(|| format!("Failed to write to {}", tmp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", tmp_path.display()))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| {
                format!(
                    "Failed to rename {} to {}",
                    tmp_path.display(),
                    self.path.display()
                )
            })
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_entries().await?.remove(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries).await?;
        tracing::trace!(key, path = %self.path.display(), "stored item");
        Ok(())
    }

    async fn delete_item(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries).await?;
            tracing::trace!(key, path = %self.path.display(), "deleted item");
        }
        Ok(())
    }
}

/// In-memory store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_item(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("store.json"));

        assert_eq!(store.get_item("language").await.unwrap(), None);
        store.delete_item("language").await.unwrap();
        assert!(!store.path().exists());
    }

    /// Values survive a new store instance over the same file.
    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = FileStore::new(&path);
        store.set_item("language", "pt").await.unwrap();
        store.set_item("onboarding_completed", "true").await.unwrap();
        store.delete_item("onboarding_completed").await.unwrap();
        drop(store);

        let reopened = FileStore::new(&path);
        assert_eq!(
            reopened.get_item("language").await.unwrap().as_deref(),
            Some("pt")
        );
        assert_eq!(reopened.get_item("onboarding_completed").await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        FileStore::new(&path).set_item("k", "v").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = FileStore::new(&path).get_item("k").await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse store"));
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store.set_item("k", "v").await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap().as_deref(), Some("v"));
        store.delete_item("k").await.unwrap();
        assert_eq!(store.get_item("k").await.unwrap(), None);
    }
}
