//! Run context - variables, forwarded secrets and artifacts produced so far

use std::collections::{HashMap, HashSet};
use std::fmt;

/// Execution context for one pipeline invocation
///
/// Tracks which artifacts were produced by successful stages of this
/// invocation. Nothing here survives across invocations.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Global and user-defined variables
    pub variables: HashMap<String, String>,

    /// Environment variables forwarded to every subprocess
    pub secrets: SecretEnv,

    /// Artifact names produced by successful stages in this invocation
    produced: HashSet<String>,
}

impl RunContext {
    pub fn new(variables: HashMap<String, String>, secrets: SecretEnv) -> Self {
        Self {
            variables,
            secrets,
            produced: HashSet::new(),
        }
    }

    /// Set a variable
    pub fn set_variable(&mut self, key: String, value: String) {
        self.variables.insert(key, value);
    }

    /// Record an artifact as produced in this invocation
    pub fn mark_produced(&mut self, artifact: &str) {
        self.produced.insert(artifact.to_string());
    }

    pub fn was_produced(&self, artifact: &str) -> bool {
        self.produced.contains(artifact)
    }

    /// Render `{{ name }}` placeholders using the context variables
    pub fn render(&self, template: &str) -> String {
        render_template(template, &self.variables)
    }
}

/// Replace `{{ key }}` placeholders with their values
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in variables {
        let placeholder = format!("{{{{ {} }}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }
    rendered
}

/// Secret environment variables passed through to subprocesses
///
/// Values never show up in `Debug` output or logs.
#[derive(Clone, Default)]
pub struct SecretEnv {
    values: Vec<(String, String)>,
}

impl SecretEnv {
    /// Read the named variables from the process environment
    ///
    /// Unset names are skipped.
    pub fn from_env(names: &[String]) -> Self {
        let values = names
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.clone(), value)))
            .collect();
        Self { values }
    }

    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self { values: pairs }
    }

    pub fn names(&self) -> Vec<&str> {
        self.values.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Apply the secrets to a command about to be spawned
    pub fn apply(&self, command: &mut tokio::process::Command) {
        for (name, value) in &self.values {
            command.env(name, value);
        }
    }
}

impl fmt::Debug for SecretEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.values.iter().map(|(name, _)| (name, "***")))
            .finish()
    }
}
