//! Model retention manager
//!
//! Keeps the newest `keep` versions of a model family in the model store and
//! deletes the rest. Listing then deleting is not transactional; one writer
//! per family is assumed.

use crate::core::PipelineError;
use crate::store::{ObjectStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Retention policy attached to a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Key prefix selecting the model family, e.g. `sarimax_model/`
    pub family_prefix: String,

    /// Versions kept, at least 1
    pub keep: usize,
}

/// A stored model version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    pub key: String,
    /// Version tag, the key without its family prefix
    pub tag: String,
    pub created_at: DateTime<Utc>,
}

/// Choose which models to delete so that `keep` remain
///
/// Oldest first by creation time, ties broken by key. Returns an empty list
/// when there are `keep` or fewer models.
pub fn plan_deletions(models: &[ModelArtifact], keep: usize) -> Vec<ModelArtifact> {
    if models.len() <= keep {
        return Vec::new();
    }

    let mut ordered = models.to_vec();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
    ordered.truncate(models.len() - keep);
    ordered
}

/// Prunes model families in a store
#[derive(Clone)]
pub struct RetentionManager {
    store: Arc<dyn ObjectStore>,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Models currently stored under `family_prefix`
    pub async fn list_family(&self, family_prefix: &str) -> Result<Vec<ModelArtifact>, PipelineError> {
        let entries = self
            .store
            .list(family_prefix)
            .await
            .map_err(|e| PipelineError::RetentionFailure {
                family: family_prefix.to_string(),
                message: format!("list failed: {}", e),
            })?;

        Ok(entries
            .into_iter()
            .map(|entry| ModelArtifact {
                tag: entry
                    .key
                    .strip_prefix(family_prefix)
                    .unwrap_or(&entry.key)
                    .to_string(),
                key: entry.key,
                created_at: entry.created_at,
            })
            .collect())
    }

    /// Keys that `prune` would delete, without deleting anything
    pub async fn plan(&self, family_prefix: &str, keep: usize) -> Result<Vec<String>, PipelineError> {
        let models = self.list_family(family_prefix).await?;
        Ok(plan_deletions(&models, keep).into_iter().map(|m| m.key).collect())
    }

    /// Delete all but the newest `keep` models, returning the deleted keys
    pub async fn prune(&self, family_prefix: &str, keep: usize) -> Result<Vec<String>, PipelineError> {
        let models = self.list_family(family_prefix).await?;
        let doomed = plan_deletions(&models, keep);

        if doomed.is_empty() {
            debug!(
                "{} models under {}, keep {}: nothing to prune",
                models.len(),
                family_prefix,
                keep
            );
            return Ok(Vec::new());
        }

        let mut deleted = Vec::with_capacity(doomed.len());
        for model in doomed {
            match self.store.delete(&model.key).await {
                Ok(()) => info!("Deleted model {}", model.key),
                Err(StoreError::NotFound(_)) => {
                    warn!("Model {} already deleted", model.key);
                }
                Err(e) => {
                    return Err(PipelineError::RetentionFailure {
                        family: family_prefix.to_string(),
                        message: format!("delete of {} failed: {}", model.key, e),
                    })
                }
            }
            deleted.push(model.key);
        }

        info!(
            "Pruned {} models under {}, kept {}",
            deleted.len(),
            family_prefix,
            models.len() - deleted.len()
        );
        Ok(deleted)
    }
}
