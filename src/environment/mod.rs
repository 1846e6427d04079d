//! Environment profile manager
//!
//! Stages name the environment they need ("light", "heavy"). Profiles are
//! provisioned lazily the first time a stage asks for them and reused after
//! that, both within a process (the registry) and across processes on the
//! same host (the provisioner's on-disk marker).

pub mod provisioner;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

pub use provisioner::CommandProvisioner;

/// Errors raised while ensuring an environment
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("unknown environment profile '{0}'")]
    Unknown(String),

    #[error("provisioning '{profile}' failed: {message}")]
    Provisioning { profile: String, message: String },
}

impl EnvironmentError {
    pub fn profile(&self) -> &str {
        match self {
            EnvironmentError::Unknown(name) => name,
            EnvironmentError::Provisioning { profile, .. } => profile,
        }
    }
}

/// Provisioning state of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Absent,
    Provisioned,
}

/// A named execution environment with its dependency manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentProfile {
    pub name: String,

    /// Dependency manifest installed into the environment
    pub dependencies: Vec<String>,

    /// Commands that create the environment
    pub setup: Vec<String>,

    /// Directory the environment lives in
    pub root: PathBuf,

    pub state: ProvisioningState,
}

impl EnvironmentProfile {
    pub fn new(name: &str, dependencies: Vec<String>, setup: Vec<String>, root: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            dependencies,
            setup,
            root,
            state: ProvisioningState::Absent,
        }
    }

    /// Canonical text of the dependency manifest
    pub fn manifest(&self) -> String {
        let mut deps = self.dependencies.clone();
        deps.sort();
        deps.join("\n")
    }

    /// Directory prepended to `PATH` for commands in this environment
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }
}

/// Trait for provisioning backends
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Whether the profile already exists on this host
    async fn is_provisioned(&self, profile: &EnvironmentProfile) -> bool;

    /// Create the profile and install its dependencies
    async fn provision(&self, profile: &EnvironmentProfile) -> Result<(), EnvironmentError>;
}

type Slot = Arc<tokio::sync::Mutex<EnvironmentProfile>>;

/// Keyed registry of environment profiles
///
/// Each profile sits behind its own async lock so the check-then-create in
/// [`EnvironmentManager::ensure`] is atomic per name while different
/// profiles can be provisioned independently.
#[derive(Debug, Default)]
pub struct EnvironmentRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding the given profiles
    pub fn with_profiles(profiles: impl IntoIterator<Item = EnvironmentProfile>) -> Self {
        let registry = Self::new();
        for profile in profiles {
            registry.register(profile);
        }
        registry
    }

    /// Add a profile; an already-registered name keeps its existing state
    pub fn register(&self, profile: EnvironmentProfile) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(profile.name.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(profile)));
    }

    fn slot(&self, name: &str) -> Option<Slot> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(name).cloned()
    }

    /// Current state of a profile, if registered
    pub async fn state(&self, name: &str) -> Option<ProvisioningState> {
        let slot = self.slot(name)?;
        let profile = slot.lock().await;
        Some(profile.state)
    }

    /// Registered profile names, sorted
    pub fn names(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<_> = slots.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Ensures environments exist before stages use them
#[derive(Clone)]
pub struct EnvironmentManager {
    registry: Arc<EnvironmentRegistry>,
    provisioner: Arc<dyn Provisioner>,
}

impl EnvironmentManager {
    pub fn new(registry: Arc<EnvironmentRegistry>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            registry,
            provisioner,
        }
    }

    pub fn registry(&self) -> &Arc<EnvironmentRegistry> {
        &self.registry
    }

    /// Return the named profile, provisioning it first if needed
    pub async fn ensure(&self, name: &str) -> Result<EnvironmentProfile, EnvironmentError> {
        let slot = self
            .registry
            .slot(name)
            .ok_or_else(|| EnvironmentError::Unknown(name.to_string()))?;

        // Held across provisioning so a second caller waits, then sees PROVISIONED
        let mut profile = slot.lock().await;

        if profile.state == ProvisioningState::Provisioned {
            debug!("Environment {} already provisioned", name);
            return Ok(profile.clone());
        }

        if self.provisioner.is_provisioned(&profile).await {
            info!("Reusing existing environment {} at {}", name, profile.root.display());
            profile.state = ProvisioningState::Provisioned;
            return Ok(profile.clone());
        }

        info!(
            "Provisioning environment {} ({} dependencies)",
            name,
            profile.dependencies.len()
        );
        self.provisioner.provision(&profile).await?;
        profile.state = ProvisioningState::Provisioned;
        info!("Environment {} provisioned", name);

        Ok(profile.clone())
    }
}
