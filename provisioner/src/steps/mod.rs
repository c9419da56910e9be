//! Step Definition Table: the ordered provisioning steps.
//!
//! Each [`Step`] pairs a read-only probe with an idempotent action. The table is
//! built once per run and never changes afterwards.

pub mod actions;
pub mod probes;

use std::fmt;

use anyhow::{Result, bail};

use crate::core::types::{ActionResult, StateResult};
use crate::io::config::RunConfig;
use crate::io::ddev::Ddev;
use crate::io::process::CommandRunner;

/// Everything a probe or action may use.
pub struct StepContext<'a> {
    pub config: &'a RunConfig,
    pub runner: &'a dyn CommandRunner,
}

impl<'a> StepContext<'a> {
    pub fn new(config: &'a RunConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    pub fn ddev(&self) -> Ddev<'a> {
        Ddev::new(self.runner, self.config)
    }
}

pub type ProbeFn = Box<dyn Fn(&StepContext<'_>) -> StateResult>;
pub type ActionFn = Box<dyn Fn(&StepContext<'_>) -> ActionResult>;

pub struct Step {
    /// Execution order; unique and strictly ascending within a table.
    pub id: u32,
    /// Short kebab-case name used in logs and the checkpoint file.
    pub key: String,
    pub label: String,
    /// Failure is recorded but does not halt the run.
    pub optional: bool,
    /// Running the action again erases data; redo needs explicit confirmation.
    pub destructive: bool,
    probe: ProbeFn,
    action: ActionFn,
}

impl Step {
    pub fn new<P, A>(
        id: u32,
        key: impl Into<String>,
        label: impl Into<String>,
        probe: P,
        action: A,
    ) -> Self
    where
        P: Fn(&StepContext<'_>) -> StateResult + 'static,
        A: Fn(&StepContext<'_>) -> ActionResult + 'static,
    {
        Self {
            id,
            key: key.into(),
            label: label.into(),
            optional: false,
            destructive: false,
            probe: Box::new(probe),
            action: Box::new(action),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    pub fn probe(&self, ctx: &StepContext<'_>) -> StateResult {
        (self.probe)(ctx)
    }

    pub fn run(&self, ctx: &StepContext<'_>) -> ActionResult {
        (self.action)(ctx)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("label", &self.label)
            .field("optional", &self.optional)
            .field("destructive", &self.destructive)
            .finish_non_exhaustive()
    }
}

/// Reject tables whose ids are zero or not strictly ascending.
pub fn validate_table(steps: &[Step]) -> Result<()> {
    let mut previous: Option<u32> = None;
    for step in steps {
        if step.id == 0 {
            bail!("step '{}' has id 0 (ids start at 1)", step.key);
        }
        if let Some(prev) = previous
            && step.id <= prev
        {
            bail!(
                "step ids must be strictly ascending: {} ('{}') follows {}",
                step.id,
                step.key,
                prev
            );
        }
        previous = Some(step.id);
    }
    Ok(())
}

/// The provisioning sequence for a DDEV-hosted Drupal site.
pub fn default_steps() -> Vec<Step> {
    vec![
        Step::new(
            1,
            "container-runtime",
            "Container runtime",
            probes::container_runtime,
            actions::start_container_runtime,
        ),
        Step::new(
            2,
            "local-certificates",
            "Local HTTPS certificates",
            probes::local_certificates,
            actions::install_certificates,
        )
        .optional(),
        Step::new(
            3,
            "project-directory",
            "Project directory",
            probes::project_directory,
            actions::create_project_directory,
        ),
        Step::new(
            4,
            "ddev-config",
            "Container environment config",
            probes::ddev_config,
            actions::configure_ddev,
        ),
        Step::new(
            5,
            "ddev-start",
            "Container environment running",
            probes::ddev_running,
            actions::start_ddev,
        ),
        Step::new(
            6,
            "composer-auth",
            "Package manager auth token",
            probes::composer_auth,
            actions::set_composer_auth,
        ),
        Step::new(
            7,
            "cms-codebase",
            "CMS codebase",
            probes::cms_codebase,
            actions::create_codebase,
        ),
        Step::new(
            8,
            "drush",
            "CMS admin tool",
            probes::drush_installed,
            actions::require_drush,
        ),
        Step::new(
            9,
            "site-install",
            "Site installation",
            probes::site_installed,
            actions::install_site,
        )
        .destructive(),
        Step::new(
            10,
            "files-directory",
            "Public files directory",
            probes::files_directory,
            actions::create_files_directory,
        ),
        Step::new(
            11,
            "contrib-modules",
            "Contributed modules downloaded",
            probes::modules_downloaded,
            actions::require_modules,
        ),
        Step::new(
            12,
            "enable-modules",
            "Contributed modules enabled",
            probes::modules_enabled,
            actions::enable_modules,
        ),
        Step::new(
            13,
            "settings-hardening",
            "Settings file protection",
            probes::settings_protected,
            actions::protect_settings,
        ),
        Step::new(
            14,
            "config-export",
            "Configuration export",
            probes::config_exported,
            actions::export_config,
        )
        .optional(),
    ]
}
