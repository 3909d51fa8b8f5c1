//! Filesystem blob store for development runs and dry runs without a bucket.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::errors::StorageError;
use crate::storage::BlobStore;

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a key onto a path under `root`, rejecting anything that could escape it.
    fn path_for(&self, operation: &'static str, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::backend(operation, key, "invalid object key"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for("head", key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::backend("head", key, e.to_string()))
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for("put", key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::backend("put", key, e.to_string()))?;
        }

        // Write then rename so readers never observe a partial object.
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp, &body).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::backend("put", key, e.to_string()));
        }
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::backend("put", key, e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for("get", key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(StorageError::backend("get", key, e.to_string())),
        }
    }

    fn location(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        assert!(!store.exists("battlecards/t1.json").await.unwrap());
        store
            .put("battlecards/t1.json", Bytes::from_static(b"{}"), "application/json")
            .await
            .unwrap();
        assert!(store.exists("battlecards/t1.json").await.unwrap());
        assert_eq!(
            store.get("battlecards/t1.json").await.unwrap(),
            Bytes::from_static(b"{}")
        );
    }

    #[tokio::test]
    async fn test_put_overwrites_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        store.put("k.json", Bytes::from_static(b"one"), "text/plain").await.unwrap();
        store.put("k.json", Bytes::from_static(b"two"), "text/plain").await.unwrap();

        assert_eq!(store.get("k.json").await.unwrap(), Bytes::from_static(b"two"));
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(matches!(
            store.get("nope.json").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("cards"));
        for key in ["../outside.json", "/etc/passwd", "", "a/../../b.json"] {
            assert!(
                matches!(store.put(key, Bytes::new(), "x").await, Err(StorageError::Backend { .. })),
                "{key:?} should be rejected"
            );
        }
    }
}
