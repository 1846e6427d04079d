//! In-memory object store

use crate::store::{ObjectEntry, ObjectStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    created_at: DateTime<Utc>,
}

/// Object store held in memory (for testing or ephemeral use)
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object with an explicit creation time
    pub async fn put_at(&self, key: &str, bytes: Vec<u8>, created_at: DateTime<Utc>) {
        let mut objects = self.objects.write().await;
        objects.insert(key.to_string(), StoredObject { bytes, created_at });
    }

    /// All keys currently stored, sorted
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectEntry {
                key: key.clone(),
                created_at: obj.created_at,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.put_at(key, bytes, Utc::now()).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
