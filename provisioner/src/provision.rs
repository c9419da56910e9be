//! End-to-end provisioning run: prerequisites, instance name, lock, optional
//! clean, then the step table with checkpoint bookkeeping.

use std::fs;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::naming::{resolve_unique_name, validate_project_name};
use crate::core::report::RunReport;
use crate::core::types::{SkipReason, StepOutcome};
use crate::errors::ProvisionError;
use crate::io::checkpoint::{Checkpoint, load_checkpoint, write_checkpoint};
use crate::io::cleanup::{CleanSummary, clean_instance};
use crate::io::config::{RunConfig, RunRequest};
use crate::io::ddev::instance_taken;
use crate::io::lock::RunLock;
use crate::io::prereqs::{REQUIRED_TOOLS, check_prerequisites};
use crate::io::process::CommandRunner;
use crate::io::prompt::Prompter;
use crate::orchestrator::{StepEvent, run_steps};
use crate::steps::{Step, StepContext};

/// Result of a provisioning run that got as far as the step table.
#[derive(Debug)]
pub struct Provisioned {
    pub config: RunConfig,
    /// Present when `--clean` removed an earlier instance first.
    pub cleaned: Option<CleanSummary>,
    pub report: RunReport,
}

/// Validate the requested project name and derive the instance name.
pub fn resolve_instance(runner: &dyn CommandRunner, request: &RunRequest) -> Result<String> {
    validate_project_name(&request.project)?;
    let base_dir = std::path::absolute(&request.base_dir)
        .with_context(|| format!("resolve {}", request.base_dir.display()))?;
    resolve_unique_name(
        &request.project,
        request.settings.name_attempt_limit,
        |candidate| instance_taken(runner, &request.settings, &base_dir, candidate),
    )
}

/// Run `steps` for `request`.
///
/// Errors before the first step (missing tools, bad name, lock held, cleanup
/// failed or declined) come back as `Err`; everything from the first step on
/// is in the report.
#[instrument(skip_all, fields(project = %request.project))]
pub fn provision<F: FnMut(&StepEvent<'_>)>(
    request: RunRequest,
    steps: &[Step],
    runner: &dyn CommandRunner,
    prompter: &dyn Prompter,
    mut on_event: F,
) -> Result<Provisioned> {
    check_prerequisites(runner, &REQUIRED_TOOLS)?;
    let request = request.with_absolute_base()?;
    let instance = resolve_instance(runner, &request)?;
    if instance != request.project {
        info!(%instance, "project name taken, using a numbered instance name");
    }
    let config = request.into_config(instance);

    fs::create_dir_all(&config.base_dir)
        .with_context(|| format!("create {}", config.base_dir.display()))?;
    let _lock = RunLock::acquire(&config.base_dir, &config.instance)?;

    let cleaned = if config.clean {
        Some(clean(runner, prompter, &config)?)
    } else {
        None
    };

    let mut checkpoint = if config.resume {
        let checkpoint = load_checkpoint(&config.workdir)?;
        info!(steps = ?checkpoint.recorded_ids(), "resuming; live probes decide what runs");
        checkpoint
    } else {
        Checkpoint::default()
    };

    let ctx = StepContext::new(&config, runner);
    let report = run_steps(steps, &ctx, prompter, |event| {
        track_checkpoint(&config, &mut checkpoint, event);
        on_event(event);
    })?;

    Ok(Provisioned {
        config,
        cleaned,
        report,
    })
}

fn clean(
    runner: &dyn CommandRunner,
    prompter: &dyn Prompter,
    config: &RunConfig,
) -> Result<CleanSummary> {
    if config.interactive {
        let message = format!(
            "Delete project {} with its databases and {}?",
            config.instance,
            config.workdir.display()
        );
        match prompter.confirm(&message) {
            Ok(true) => {}
            Ok(false) => {
                return Err(ProvisionError::UserCancelled("clean declined".to_string()).into());
            }
            Err(err) => {
                return Err(ProvisionError::UserCancelled(format!("{err:#}")).into());
            }
        }
    }
    clean_instance(runner, config)
}

/// Keep the checkpoint hint in line with what the live probes observe.
fn track_checkpoint(config: &RunConfig, checkpoint: &mut Checkpoint, event: &StepEvent<'_>) {
    let changed = match event {
        StepEvent::Probed(step, state) => {
            let stale = !state.is_satisfied() && checkpoint.forget(step.id);
            if stale {
                warn!(
                    step = step.id,
                    key = %step.key,
                    "checkpoint lists step as done but it is not; running it"
                );
            }
            stale
        }
        StepEvent::Finished(
            step,
            StepOutcome::Ran | StepOutcome::Skipped(SkipReason::AlreadySatisfied),
        ) => {
            checkpoint.record(step.id, &step.key);
            true
        }
        StepEvent::Started(_) | StepEvent::Finished(..) => false,
    };
    if changed && let Err(err) = write_checkpoint(&config.workdir, checkpoint) {
        warn!(error = %format!("{err:#}"), "checkpoint not updated");
    }
}
