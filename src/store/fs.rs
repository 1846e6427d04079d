//! Directory-backed object store

use crate::store::{ObjectEntry, ObjectStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Object store rooted at a local directory
///
/// A key maps to `root/<key>`. An object may be a file or a directory (model
/// stores keep one directory per version). `list` only looks at the
/// immediate children of the prefix's directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }

    fn map_io(key: &str, err: std::io::Error) -> StoreError {
        if err.kind() == ErrorKind::NotFound {
            StoreError::NotFound(key.to_string())
        } else {
            StoreError::io(key, err)
        }
    }
}

/// Split `a/b/c` into (`a/b/`, `c`)
fn split_prefix(prefix: &str) -> (&str, &str) {
    match prefix.rfind('/') {
        Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
        None => ("", prefix),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        let (dir_part, name_part) = split_prefix(prefix);
        let dir = self.path_for(dir_part);

        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(prefix, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| StoreError::io(prefix, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(name_part) {
                continue;
            }

            let metadata = entry
                .metadata()
                .await
                .map_err(|e| StoreError::io(&name, e))?;
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_err(|e| StoreError::io(&name, e))?;

            entries.push(ObjectEntry {
                key: format!("{}{}", dir_part, name),
                created_at: DateTime::<Utc>::from(created),
            });
        }

        debug!("Listed {} objects under {}", entries.len(), prefix);
        Ok(entries)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        tokio::fs::read(self.path_for(key))
            .await
            .map_err(|e| Self::map_io(key, e))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(key, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::io(key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let metadata = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| Self::map_io(key, e))?;

        let result = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        result.map_err(|e| Self::map_io(key, e))
    }
}
