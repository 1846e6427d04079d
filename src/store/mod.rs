//! Remote object store abstraction
//!
//! Keys are `/`-separated strings. Both artifact sync and model retention
//! talk to a store through [`ObjectStore`]; tests use [`InMemoryObjectStore`].

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use fs::FsObjectStore;
pub use memory::InMemoryObjectStore;

/// Object store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("store I/O error on '{key}': {message}")]
    Io { key: String, message: String },
}

impl StoreError {
    pub(crate) fn io(key: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Io {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

/// A listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// Keyed blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Entries whose key starts with `prefix`, in no particular order
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Delete an object; a missing key is `NotFound`
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
