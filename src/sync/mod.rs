//! Artifact sync client
//!
//! Pulls stage inputs from and pushes stage outputs to the remote store.
//! Backends implement [`ArtifactStore`]; [`ArtifactSyncClient`] applies the
//! optional-input policy and turns failures into stage errors.

pub mod dvc;

use crate::core::{ArtifactRef, PipelineError, StageInput};
use crate::store::{ObjectStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use dvc::DvcArtifactStore;

/// Artifact transfer errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// The artifact does not exist in the remote store
    #[error("'{0}' not found in remote store")]
    NotFound(String),

    /// Network, credential or tool failure
    #[error("transfer of '{artifact}' failed: {message}")]
    Transient { artifact: String, message: String },

    /// Reading or writing the working-tree copy failed
    #[error("local file {path}: {message}")]
    Local { path: String, message: String },
}

/// Result of a pull that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    Fetched,
    /// Optional input absent from the remote
    Missing,
}

/// Backend moving artifacts between the working tree and a remote
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch the artifact into its local path
    async fn pull(&self, artifact: &ArtifactRef) -> Result<(), SyncError>;

    /// Upload the artifact from its local path
    async fn push(&self, artifact: &ArtifactRef) -> Result<(), SyncError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Stage-facing sync client
#[derive(Clone)]
pub struct ArtifactSyncClient {
    store: Arc<dyn ArtifactStore>,
}

impl ArtifactSyncClient {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Pull a stage input
    ///
    /// A missing optional input is logged and reported as `Missing`; every
    /// other failure is a `SyncFailure`.
    pub async fn pull(&self, input: &StageInput) -> Result<PullOutcome, PipelineError> {
        let artifact = &input.artifact;
        debug!("Pulling {} via {}", artifact.name, self.store.name());

        match self.store.pull(artifact).await {
            Ok(()) => {
                info!("Pulled {} -> {}", artifact.remote_key, artifact.local_path.display());
                Ok(PullOutcome::Fetched)
            }
            Err(SyncError::NotFound(_)) if input.optional => {
                warn!(
                    "Optional input {} not found in remote, continuing without it",
                    artifact.name
                );
                Ok(PullOutcome::Missing)
            }
            Err(e) => Err(PipelineError::SyncFailure {
                artifact: artifact.name.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// Push a stage output
    pub async fn push(&self, artifact: &ArtifactRef) -> Result<(), PipelineError> {
        debug!("Pushing {} via {}", artifact.name, self.store.name());
        self.store
            .push(artifact)
            .await
            .map_err(|e| PipelineError::SyncFailure {
                artifact: artifact.name.clone(),
                message: e.to_string(),
            })?;
        info!("Pushed {} -> {}", artifact.local_path.display(), artifact.remote_key);
        Ok(())
    }
}

/// Artifact store backed by an [`ObjectStore`]
///
/// Copies whole files between `local_path` and `remote_key`.
pub struct ObjectStoreArtifacts {
    objects: Arc<dyn ObjectStore>,
}

impl ObjectStoreArtifacts {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl ArtifactStore for ObjectStoreArtifacts {
    async fn pull(&self, artifact: &ArtifactRef) -> Result<(), SyncError> {
        let bytes = self
            .objects
            .get(&artifact.remote_key)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(key) => SyncError::NotFound(key),
                other => SyncError::Transient {
                    artifact: artifact.name.clone(),
                    message: other.to_string(),
                },
            })?;

        let local = |e: std::io::Error| SyncError::Local {
            path: artifact.local_path.display().to_string(),
            message: e.to_string(),
        };
        if let Some(parent) = artifact.local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(local)?;
            }
        }
        tokio::fs::write(&artifact.local_path, bytes)
            .await
            .map_err(local)
    }

    async fn push(&self, artifact: &ArtifactRef) -> Result<(), SyncError> {
        let bytes = tokio::fs::read(&artifact.local_path)
            .await
            .map_err(|e| SyncError::Local {
                path: artifact.local_path.display().to_string(),
                message: e.to_string(),
            })?;

        self.objects
            .put(&artifact.remote_key, bytes)
            .await
            .map_err(|e| SyncError::Transient {
                artifact: artifact.name.clone(),
                message: e.to_string(),
            })
    }

    fn name(&self) -> &str {
        "object-store"
    }
}
