//! Adapter for the container-environment manager (`ddev`) and the tools it wraps.
//!
//! Composer and Drush run inside the project's containers through
//! `ddev composer` / `ddev drush`, so every call here goes through `ddev`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::core::parse::describe_approot;
use crate::io::config::{RunConfig, Settings};
use crate::io::process::{CommandOutput, CommandRunner, CommandSpec, ExitState};

pub const DDEV: &str = "ddev";

/// `ddev` invocations scoped to one project directory.
pub struct Ddev<'a> {
    runner: &'a dyn CommandRunner,
    workdir: &'a Path,
    settings: &'a Settings,
}

impl<'a> Ddev<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a RunConfig) -> Self {
        Self {
            runner,
            workdir: &config.workdir,
            settings: &config.settings,
        }
    }

    /// Spec for `ddev <args>` in the project directory with the standard timeout.
    pub fn spec<S: AsRef<str>>(&self, args: &[S]) -> CommandSpec {
        self.spec_with_timeout(args, self.settings.command_timeout())
    }

    /// Spec for long-running work (downloads, site install).
    pub fn long_spec<S: AsRef<str>>(&self, args: &[S]) -> CommandSpec {
        self.spec_with_timeout(args, self.settings.long_command_timeout())
    }

    fn spec_with_timeout<S: AsRef<str>>(&self, args: &[S], timeout: Duration) -> CommandSpec {
        CommandSpec::new(DDEV)
            .args(args)
            .current_dir(self.workdir)
            .timeout(timeout)
            .output_limit(self.settings.output_limit_bytes)
    }

    /// Read-only query with the probe timeout.
    pub fn query<S: AsRef<str>>(&self, args: &[S]) -> CommandOutput {
        let spec = self.spec_with_timeout(args, self.settings.probe_timeout());
        self.runner.run(&spec)
    }

    /// `ddev describe -j <name>`; works from any directory.
    pub fn describe(&self, name: &str) -> CommandOutput {
        describe(self.runner, self.settings, name)
    }
}

/// `ddev describe -j <name>` without a project directory.
pub fn describe(runner: &dyn CommandRunner, settings: &Settings, name: &str) -> CommandOutput {
    let spec = CommandSpec::new(DDEV)
        .args(&["describe", "-j", name])
        .timeout(settings.probe_timeout())
        .output_limit(settings.output_limit_bytes);
    runner.run(&spec)
}

/// Whether `candidate` is already used by a project that is not ours.
///
/// A project whose app root is `<base_dir>/<candidate>` is a previous run of
/// this provisioner and does not count as a collision.
#[instrument(skip(runner, settings, base_dir))]
pub fn instance_taken(
    runner: &dyn CommandRunner,
    settings: &Settings,
    base_dir: &Path,
    candidate: &str,
) -> Result<bool> {
    let output = describe(runner, settings, candidate);
    match output.status {
        ExitState::Exited(0) => {
            let workdir = base_dir.join(candidate);
            let ours = describe_approot(&output.stdout)
                .is_some_and(|approot| same_directory(&approot, &workdir));
            debug!(ours, "project name exists");
            Ok(!ours)
        }
        ExitState::Exited(_) => Ok(false),
        ExitState::TimedOut | ExitState::Signalled | ExitState::SpawnFailed(_) => Err(anyhow!(
            "cannot query {DDEV} for project '{candidate}' ({:?})",
            output.status
        )),
    }
}

/// Paths name the same directory, literally or once symlinks are resolved.
fn same_directory(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Whether the container manager knows a project called `name` at all.
pub fn project_exists(runner: &dyn CommandRunner, settings: &Settings, name: &str) -> bool {
    describe(runner, settings, name).success()
}
