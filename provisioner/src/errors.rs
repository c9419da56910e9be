//! Fatal conditions that end a provisioning run before or outside the step loop.
//!
//! Step failures are not errors here: they become `Failed` records in the run
//! report. These variants cover what happens around the orchestrator and map
//! onto [`crate::exit_codes`].

use std::path::PathBuf;

use thiserror::Error;

use crate::exit_codes;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("missing required tools: {} (install them and re-run)", tools.join(", "))]
    PrerequisiteMissing { tools: Vec<String> },

    #[error("no free project name derived from '{base}' after {attempts} attempts")]
    NamesExhausted { base: String, attempts: u32 },

    #[error("invalid project name '{name}': {reason}")]
    InvalidProjectName { name: String, reason: String },

    #[error("cancelled: {0}")]
    UserCancelled(String),

    #[error("another provisioning run holds {}", path.display())]
    Locked { path: PathBuf },

    #[error("cleanup of '{instance}' incomplete after {attempts} attempts: {remaining} volume(s) remain")]
    CleanupFailed {
        instance: String,
        attempts: u32,
        remaining: usize,
    },
}

impl ProvisionError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::PrerequisiteMissing { .. } => exit_codes::MISSING_PREREQUISITES,
            ProvisionError::UserCancelled(_) => exit_codes::CANCELLED,
            ProvisionError::NamesExhausted { .. }
            | ProvisionError::InvalidProjectName { .. }
            | ProvisionError::Locked { .. }
            | ProvisionError::CleanupFailed { .. } => exit_codes::INVALID,
        }
    }
}

/// Map any error escaping a run onto a stable exit code.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ProvisionError>()
        .map(ProvisionError::exit_code)
        .unwrap_or(exit_codes::INVALID)
}
