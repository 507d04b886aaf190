//! File-backed key/value store (feature-gated).
//!
//! All keys live in one JSON object. Every write rewrites the file through a
//! temporary sibling and a rename, so a crash never leaves a torn file.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use remote_console_core::traits::{KeyValueStore, StorageError};
use tokio::sync::Mutex;

/// File storage implementation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file is an empty store. A file that is not a JSON object of
    /// strings is ignored and overwritten on the next write.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read, or the parent
    /// directory cannot be created.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let values = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "Ignoring unreadable state file: {e}");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(values)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().await;
        values.insert(key.to_string(), value.to_string());
        self.flush(&values).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().await;
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.flush(&values).await
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = assert_ok!(FileStore::open(&path).await);
        store.set("codex-web-session-id", "s1").await.unwrap();
        store.set("other", "x").await.unwrap();
        store.remove("other").await.unwrap();
        drop(store);

        let reopened = assert_ok!(FileStore::open(&path).await);
        assert_eq!(
            reopened.get("codex-web-session-id").await.unwrap().as_deref(),
            Some("s1")
        );
        assert_eq!(reopened.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "[1, 2, 3]").await.unwrap();

        let store = assert_ok!(FileStore::open(&path).await);
        assert_eq!(store.get("anything").await.unwrap(), None);

        store.set("k", "v").await.unwrap();
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("\"k\": \"v\""));
    }
}
