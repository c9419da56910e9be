//! Prerequisite tools, checked once before any step runs.

use tracing::debug;

use crate::errors::ProvisionError;
use crate::io::cleanup::DOCKER;
use crate::io::ddev::DDEV;
use crate::io::process::CommandRunner;

/// Tools the provisioner cannot work without. Composer and Drush run inside
/// the containers; `mkcert` is handled by its own optional step.
pub const REQUIRED_TOOLS: [&str; 2] = [DOCKER, DDEV];

/// Verify every tool in `tools` is on `PATH`, reporting all missing ones at once.
pub fn check_prerequisites(
    runner: &dyn CommandRunner,
    tools: &[&str],
) -> Result<(), ProvisionError> {
    let mut missing = Vec::new();
    for tool in tools {
        match runner.locate(tool) {
            Some(path) => debug!(tool, path = %path.display(), "found tool"),
            None => missing.push(tool.to_string()),
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    Err(ProvisionError::PrerequisiteMissing { tools: missing })
}
