//! Artifact references

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A named artifact exchanged between stages through the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Logical name used by stage declarations
    pub name: String,

    /// Key in the remote store
    pub remote_key: String,

    /// Path in the working tree
    pub local_path: PathBuf,

    /// Version-control metadata file; defaults to `<local_path>.dvc`
    #[serde(default)]
    pub metadata_path: Option<PathBuf>,
}

impl ArtifactRef {
    pub fn new(name: &str, remote_key: &str, local_path: impl AsRef<Path>) -> Self {
        Self {
            name: name.to_string(),
            remote_key: remote_key.to_string(),
            local_path: local_path.as_ref().to_path_buf(),
            metadata_path: None,
        }
    }

    /// File staged in version control for this artifact
    pub fn metadata_path(&self) -> PathBuf {
        match &self.metadata_path {
            Some(path) => path.clone(),
            None => {
                let mut name = self.local_path.as_os_str().to_os_string();
                name.push(".dvc");
                PathBuf::from(name)
            }
        }
    }
}

/// An input declared by a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInput {
    pub artifact: ArtifactRef,

    /// The artifact may not exist yet (first-ever run of the producer)
    pub optional: bool,
}
