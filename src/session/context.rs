//! Mutable state of one operator session.

use std::path::PathBuf;
use std::sync::Arc;

use crate::changeset::ChangeSet;
use crate::state::ResourceIndex;

/// Everything the controller remembers between operations.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Directory holding the configuration the tool runs against.
    pub workdir: PathBuf,
    /// Variable files passed to the last plan.
    pub var_files: Vec<PathBuf>,
    /// Change set of the last successful plan.
    pub last_change_set: Option<Arc<ChangeSet>>,
    /// Set once an apply has been issued against `last_change_set`.
    pub last_change_set_consumed: bool,
    /// SHA-256 of the plan artifact written by the last successful plan.
    pub artifact_digest: Option<String>,
    /// Index built by the last state refresh.
    pub last_index: Option<Arc<ResourceIndex>>,
}

impl SessionContext {
    /// Creates an empty context for a workdir.
    #[must_use]
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            var_files: Vec::new(),
            last_change_set: None,
            last_change_set_consumed: false,
            artifact_digest: None,
            last_index: None,
        }
    }

    /// Returns true if the workdir has been initialized (`.terraform/` exists).
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.workdir.join(".terraform").is_dir()
    }

    /// Reason the current change set cannot be applied, judged from memory
    /// alone. The artifact digest is checked separately.
    #[must_use]
    pub fn stale_reason(&self) -> Option<&'static str> {
        if self.last_change_set.is_none() {
            Some("no plan has been produced in this session; run plan first")
        } else if self.last_change_set_consumed {
            Some("the last plan has already been applied; run plan again")
        } else if self.artifact_digest.is_none() {
            Some("the last plan has no recorded artifact; run plan again")
        } else {
            None
        }
    }
}
