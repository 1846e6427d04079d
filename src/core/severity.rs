//! Severity table consulted at the stage boundary

use crate::core::error::ErrorClass;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the executor reacts to a class of error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Abort the remaining stages and fail the run
    Fatal,
    /// Record a note on the stage and keep going
    Recoverable,
}

/// Per-class severity lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityTable {
    entries: HashMap<ErrorClass, Severity>,
}

impl SeverityTable {
    /// Build a table from the defaults plus overrides
    pub fn with_overrides(overrides: &HashMap<ErrorClass, Severity>) -> Self {
        let mut table = Self::default();
        for (class, severity) in overrides {
            table.entries.insert(*class, *severity);
        }
        table
    }

    /// Severity of an error class
    pub fn severity_of(&self, class: ErrorClass) -> Severity {
        self.entries.get(&class).copied().unwrap_or(Severity::Fatal)
    }

    pub fn is_fatal(&self, class: ErrorClass) -> bool {
        self.severity_of(class) == Severity::Fatal
    }

    /// Entries sorted by class name, for display
    pub fn entries(&self) -> Vec<(ErrorClass, Severity)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(c, s)| (*c, *s)).collect();
        entries.sort_by_key(|(class, _)| class.as_str());
        entries
    }
}

impl Default for SeverityTable {
    fn default() -> Self {
        let entries = ErrorClass::ALL
            .iter()
            .map(|class| {
                let severity = match class {
                    ErrorClass::CommitConflict | ErrorClass::NothingToCommit => {
                        Severity::Recoverable
                    }
                    _ => Severity::Fatal,
                };
                (*class, severity)
            })
            .collect();
        Self { entries }
    }
}
