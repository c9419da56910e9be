//! `--clean`: remove an instance's containers, storage volumes and directory.

use std::fs;
use std::thread;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::naming::volume_owned_by;
use crate::core::parse::non_empty_lines;
use crate::errors::ProvisionError;
use crate::io::config::RunConfig;
use crate::io::ddev::{DDEV, project_exists};
use crate::io::process::{CommandRunner, CommandSpec, must_succeed};

pub const DOCKER: &str = "docker";

/// What a clean pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanSummary {
    pub project_deleted: bool,
    pub volumes_removed: usize,
    pub workdir_removed: bool,
}

/// Remove every trace of `config.instance`.
///
/// Storage volumes are removed in at most `volume_cleanup_attempts` passes; any
/// that survive end the clean with [`ProvisionError::CleanupFailed`].
#[instrument(skip_all, fields(instance = %config.instance))]
pub fn clean_instance(runner: &dyn CommandRunner, config: &RunConfig) -> Result<CleanSummary> {
    let settings = &config.settings;
    let mut summary = CleanSummary::default();

    if project_exists(runner, settings, &config.instance) {
        let spec = CommandSpec::new(DDEV)
            .args(&["delete", "--omit-snapshot", "--yes", config.instance.as_str()])
            .timeout(settings.command_timeout())
            .output_limit(settings.output_limit_bytes);
        must_succeed(runner, &spec).map_err(|failure| anyhow!(failure.reason))?;
        info!("project deleted");
        summary.project_deleted = true;
    }

    summary.volumes_removed = remove_volumes(runner, config)?;

    if config.workdir.exists() {
        fs::remove_dir_all(&config.workdir)
            .with_context(|| format!("remove {}", config.workdir.display()))?;
        info!(workdir = %config.workdir.display(), "working directory removed");
        summary.workdir_removed = true;
    }

    Ok(summary)
}

fn remove_volumes(runner: &dyn CommandRunner, config: &RunConfig) -> Result<usize> {
    let settings = &config.settings;
    let mut removed = 0usize;

    for attempt in 1..=settings.volume_cleanup_attempts {
        let volumes = owned_volumes(runner, config)?;
        if volumes.is_empty() {
            debug!(attempt, removed, "no volumes left");
            return Ok(removed);
        }

        debug!(attempt, count = volumes.len(), "removing volumes");
        let remove = CommandSpec::new(DOCKER)
            .args(&["volume", "rm", "--force"])
            .args(volumes.as_slice())
            .timeout(settings.command_timeout());
        let output = runner.run(&remove);
        if output.success() {
            removed += volumes.len();
        } else {
            warn!(attempt, stderr = %output.stderr.trim(), "volume removal incomplete");
        }

        if attempt < settings.volume_cleanup_attempts {
            thread::sleep(settings.retry_delay());
        }
    }

    let remaining = owned_volumes(runner, config)?.len();
    if remaining == 0 {
        return Ok(removed);
    }
    Err(ProvisionError::CleanupFailed {
        instance: config.instance.clone(),
        attempts: settings.volume_cleanup_attempts,
        remaining,
    }
    .into())
}

/// Volumes `ddev` created for this instance; neighbours sharing a name prefix are left alone.
fn owned_volumes(runner: &dyn CommandRunner, config: &RunConfig) -> Result<Vec<String>> {
    let filter = format!("name={}", config.instance);
    let list = CommandSpec::new(DOCKER)
        .args(&["volume", "ls", "-q", "--filter", filter.as_str()])
        .timeout(config.settings.probe_timeout());
    let output = must_succeed(runner, &list).map_err(|failure| anyhow!(failure.reason))?;
    let (owned, foreign): (Vec<String>, Vec<String>) = non_empty_lines(&output.stdout)
        .into_iter()
        .partition(|volume| volume_owned_by(&config.instance, volume));
    if !foreign.is_empty() {
        debug!(?foreign, "ignoring volumes of other projects");
    }
    Ok(owned)
}
