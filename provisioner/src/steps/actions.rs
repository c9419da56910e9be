//! Step actions. Each one is safe to run again after a partial or complete
//! earlier run; the external tools are invoked through the [`CommandRunner`].
//!
//! [`CommandRunner`]: crate::io::process::CommandRunner

use std::fs;
use std::io;
use std::path::Path;
use std::thread;

use tracing::{info, instrument, warn};

use crate::core::types::{ActionResult, StepFailure};
use crate::io::cleanup::DOCKER;
use crate::io::process::{CommandSpec, must_succeed};
use crate::steps::StepContext;
use crate::steps::probes::{DirState, MKCERT, directory_state, files_dir, settings_file};

fn check(ctx: &StepContext<'_>, spec: &CommandSpec) -> Result<(), StepFailure> {
    must_succeed(ctx.runner, spec).map(|_| ())
}

fn io_failure(what: &str, path: &Path, err: &io::Error) -> StepFailure {
    StepFailure::io(format!("{what} {}: {err}", path.display()))
}

#[instrument(skip_all)]
pub fn start_container_runtime(ctx: &StepContext<'_>) -> ActionResult {
    let settings = &ctx.config.settings;
    let start = match CommandSpec::from_argv(settings.runtime_start_command.as_slice()) {
        Ok(spec) => spec.timeout(settings.command_timeout()),
        Err(err) => return ActionResult::Failure(StepFailure::precondition(err.to_string())),
    };
    let info_spec = CommandSpec::new(DOCKER)
        .arg("info")
        .timeout(settings.probe_timeout());

    let attempts = settings.runtime_start_attempts;
    for attempt in 1..=attempts {
        let output = ctx.runner.run(&start);
        if let Some(failure) = output.failure(&start) {
            warn!(attempt, reason = %failure, "runtime start command failed");
        }
        if ctx.runner.run(&info_spec).success() {
            info!(attempt, "container runtime is up");
            return ActionResult::Success;
        }
        if attempt < attempts {
            thread::sleep(settings.retry_delay());
        }
    }
    ActionResult::Failure(StepFailure::command(format!(
        "container runtime did not become reachable after {attempts} start attempts"
    )))
}

pub fn install_certificates(ctx: &StepContext<'_>) -> ActionResult {
    install_certificates_inner(ctx).into()
}

fn install_certificates_inner(ctx: &StepContext<'_>) -> Result<(), StepFailure> {
    let settings = &ctx.config.settings;
    if ctx.runner.locate(MKCERT).is_none() {
        let install = CommandSpec::from_argv(settings.package_install_command.as_slice())
            .map_err(|err| StepFailure::precondition(err.to_string()))?
            .arg(MKCERT)
            .timeout(settings.long_command_timeout());
        check(ctx, &install)?;
    }
    let spec = CommandSpec::new(MKCERT)
        .arg("-install")
        .timeout(settings.command_timeout());
    check(ctx, &spec)
}

pub fn create_project_directory(ctx: &StepContext<'_>) -> ActionResult {
    let workdir = &ctx.config.workdir;
    let state = match directory_state(workdir) {
        Ok(state) => state,
        Err(err) => return ActionResult::Failure(io_failure("cannot inspect", workdir, &err)),
    };
    match state {
        DirState::Empty | DirState::Recognized => ActionResult::Success,
        DirState::NotADirectory => ActionResult::Failure(StepFailure::conflict(format!(
            "{} exists and is not a directory",
            workdir.display()
        ))),
        DirState::Foreign => ActionResult::Failure(StepFailure::conflict(format!(
            "{} contains files that were not created by a provisioning run; \
             move them away or use --clean",
            workdir.display()
        ))),
        DirState::Missing => match fs::create_dir_all(workdir) {
            Ok(()) => ActionResult::Success,
            Err(err) => ActionResult::Failure(io_failure("cannot create", workdir, &err)),
        },
    }
}

pub fn configure_ddev(ctx: &StepContext<'_>) -> ActionResult {
    let settings = &ctx.config.settings;
    let args = [
        "config".to_string(),
        format!("--project-type={}", settings.project_type),
        format!("--docroot={}", settings.docroot),
        format!("--project-name={}", ctx.config.instance),
    ];
    check(ctx, &ctx.ddev().spec(&args)).into()
}

#[instrument(skip_all, fields(instance = %ctx.config.instance))]
pub fn start_ddev(ctx: &StepContext<'_>) -> ActionResult {
    let settings = &ctx.config.settings;
    let spec = ctx.ddev().long_spec(&["start", ctx.config.instance.as_str()]);
    let attempts = settings.runtime_start_attempts;
    let mut last = None;
    for attempt in 1..=attempts {
        match check(ctx, &spec) {
            Ok(()) => return ActionResult::Success,
            Err(failure) => {
                warn!(attempt, reason = %failure, "environment start failed");
                last = Some(failure);
            }
        }
        if attempt < attempts {
            thread::sleep(settings.retry_delay());
        }
    }
    let reason = last.map(|failure| failure.reason).unwrap_or_default();
    ActionResult::Failure(StepFailure::command(format!(
        "environment did not start after {attempts} attempts: {reason}"
    )))
}

pub fn set_composer_auth(ctx: &StepContext<'_>) -> ActionResult {
    let Some(token) = &ctx.config.token else {
        return ActionResult::Success;
    };
    let spec = ctx
        .ddev()
        .spec(&["composer", "config", "--global", "github-oauth.github.com"])
        .secret_arg(token.expose());
    check(ctx, &spec).into()
}

pub fn create_codebase(ctx: &StepContext<'_>) -> ActionResult {
    let spec = ctx.ddev().long_spec(&[
        "composer",
        "create-project",
        ctx.config.settings.recipe.as_str(),
        "--no-interaction",
    ]);
    check(ctx, &spec).into()
}

pub fn require_drush(ctx: &StepContext<'_>) -> ActionResult {
    let spec = ctx.ddev().long_spec(&["composer", "require", "drush/drush"]);
    check(ctx, &spec).into()
}

pub fn install_site(ctx: &StepContext<'_>) -> ActionResult {
    let settings = &ctx.config.settings;
    let args = [
        "drush".to_string(),
        "site:install".to_string(),
        settings.install_profile.clone(),
        format!("--site-name={}", ctx.config.site_name()),
        format!("--account-name={}", settings.admin_user),
        "-y".to_string(),
    ];
    check(ctx, &ctx.ddev().long_spec(&args)).into()
}

pub fn create_files_directory(ctx: &StepContext<'_>) -> ActionResult {
    let path = files_dir(ctx);
    if let Err(err) = fs::create_dir_all(&path) {
        return ActionResult::Failure(io_failure("cannot create", &path, &err));
    }
    match make_group_writable(&path) {
        Ok(()) => ActionResult::Success,
        Err(err) => ActionResult::Failure(io_failure("cannot change mode of", &path, &err)),
    }
}

pub fn require_modules(ctx: &StepContext<'_>) -> ActionResult {
    let modules = &ctx.config.settings.modules;
    if modules.is_empty() {
        return ActionResult::Success;
    }
    let packages: Vec<&str> = modules.iter().map(|m| m.package.as_str()).collect();
    let spec = ctx
        .ddev()
        .long_spec(&["composer", "require"])
        .args(packages.as_slice());
    check(ctx, &spec).into()
}

pub fn enable_modules(ctx: &StepContext<'_>) -> ActionResult {
    let modules = &ctx.config.settings.modules;
    if modules.is_empty() {
        return ActionResult::Success;
    }
    let names: Vec<&str> = modules.iter().map(|m| m.machine_name.as_str()).collect();
    let spec = ctx
        .ddev()
        .long_spec(&["drush", "pm:enable", "-y"])
        .args(names.as_slice());
    check(ctx, &spec).into()
}

pub fn protect_settings(ctx: &StepContext<'_>) -> ActionResult {
    let path = settings_file(ctx);
    if !path.is_file() {
        return ActionResult::Failure(StepFailure::precondition(format!(
            "{} does not exist; the site must be installed first",
            path.display()
        )));
    }
    match make_read_only(&path) {
        Ok(()) => ActionResult::Success,
        Err(err) => ActionResult::Failure(io_failure("cannot change mode of", &path, &err)),
    }
}

pub fn export_config(ctx: &StepContext<'_>) -> ActionResult {
    let spec = ctx.ddev().spec(&["drush", "config:export", "-y"]);
    check(ctx, &spec).into()
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(unix)]
fn make_group_writable(path: &Path) -> io::Result<()> {
    set_mode(path, 0o775)
}

/// Without mode bits the probe only checks the read-only flag, so clear it.
#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn make_group_writable(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
}

#[cfg(unix)]
fn make_read_only(path: &Path) -> io::Result<()> {
    set_mode(path, 0o444)
}

#[cfg(not(unix))]
fn make_read_only(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FailureKind;
    use crate::io::config::Secret;
    use crate::io::process::{CommandOutput, CommandRunner};
    use crate::test_support::{ScriptedRunner, run_config};

    fn failure_kind(result: ActionResult) -> Option<FailureKind> {
        match result {
            ActionResult::Success => None,
            ActionResult::Failure(failure) => Some(failure.kind),
        }
    }

    #[test]
    fn runtime_start_polls_until_reachable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        runner.on_sequence(
            &["docker", "info"],
            vec![
                CommandOutput::exited(1, "", "daemon down"),
                CommandOutput::exited(0, "", ""),
            ],
        );
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(start_container_runtime(&ctx), ActionResult::Success);
        let start = config.settings.runtime_start_command.clone();
        assert_eq!(runner.count(start.as_slice()), 2);
    }

    #[test]
    fn runtime_start_gives_up_after_bounded_attempts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        runner.on(&["docker", "info"], CommandOutput::exited(1, "", "daemon down"));
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(
            failure_kind(start_container_runtime(&ctx)),
            Some(FailureKind::Command)
        );
        assert_eq!(
            runner.count(&["docker", "info"]),
            config.settings.runtime_start_attempts as usize
        );
    }

    #[test]
    fn certificates_install_mkcert_when_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        runner.missing("mkcert");
        let mut install = config.settings.package_install_command.clone();
        install.push("mkcert".to_string());
        runner.on_install(install.as_slice(), "mkcert");
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(install_certificates(&ctx), ActionResult::Success);
        assert_eq!(runner.count(install.as_slice()), 1);
        assert_eq!(runner.count(&["mkcert", "-install"]), 1);
        assert!(runner.locate("mkcert").is_some());

        assert_eq!(install_certificates(&ctx), ActionResult::Success);
        assert_eq!(runner.count(install.as_slice()), 1);
        assert_eq!(runner.count(&["mkcert", "-install"]), 2);
    }

    #[test]
    fn certificates_fail_when_package_install_leaves_mkcert_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        runner.missing("mkcert");
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(
            failure_kind(install_certificates(&ctx)),
            Some(FailureKind::Command)
        );
    }

    #[test]
    fn project_directory_is_created_or_refused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(create_project_directory(&ctx), ActionResult::Success);
        assert!(config.workdir.is_dir());
        assert_eq!(create_project_directory(&ctx), ActionResult::Success);

        fs::write(config.workdir.join("README"), "someone else's").expect("write");
        assert_eq!(
            failure_kind(create_project_directory(&ctx)),
            Some(FailureKind::Conflict)
        );
    }

    #[test]
    fn ddev_config_passes_instance_and_settings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog2");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(configure_ddev(&ctx), ActionResult::Success);
        let calls = runner.calls();
        assert_eq!(
            calls[0].argv(),
            vec![
                "ddev",
                "config",
                "--project-type=drupal11",
                "--docroot=web",
                "--project-name=blog2",
            ]
        );
        assert_eq!(calls[0].cwd.as_deref(), Some(config.workdir.as_path()));
    }

    #[test]
    fn ddev_start_retries_then_reports_last_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        runner.on_sequence(
            &["ddev", "start"],
            vec![
                CommandOutput::exited(1, "", "port 443 busy"),
                CommandOutput::exited(0, "", ""),
            ],
        );
        let ctx = StepContext::new(&config, &runner);
        assert_eq!(start_ddev(&ctx), ActionResult::Success);
        assert_eq!(runner.count(&["ddev", "start"]), 2);

        let runner = ScriptedRunner::new();
        runner.on(&["ddev", "start"], CommandOutput::exited(1, "", "port 443 busy"));
        let ctx = StepContext::new(&config, &runner);
        match start_ddev(&ctx) {
            ActionResult::Failure(failure) => assert!(failure.reason.contains("port 443 busy")),
            ActionResult::Success => panic!("start should fail"),
        }
    }

    #[test]
    fn composer_token_is_masked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = run_config(temp.path(), "blog");
        config.token = Some(Secret::new("ghp_secret"));
        let runner = ScriptedRunner::new();
        runner.on(
            &["ddev", "composer", "config"],
            CommandOutput::exited(1, "", "composer not available"),
        );
        let ctx = StepContext::new(&config, &runner);

        match set_composer_auth(&ctx) {
            ActionResult::Failure(failure) => {
                assert!(!failure.reason.contains("ghp_secret"));
                assert!(failure.reason.contains("***"));
            }
            ActionResult::Success => panic!("should fail"),
        }
        assert_eq!(runner.calls()[0].argv().last(), Some(&"ghp_secret"));
    }

    #[test]
    fn site_install_uses_profile_and_site_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(install_site(&ctx), ActionResult::Success);
        assert_eq!(
            runner.count(&[
                "ddev",
                "drush",
                "site:install",
                "standard",
                "--site-name=blog",
                "--account-name=admin",
                "-y",
            ]),
            1
        );
    }

    #[test]
    fn modules_are_required_and_enabled_together() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(require_modules(&ctx), ActionResult::Success);
        assert_eq!(enable_modules(&ctx), ActionResult::Success);
        assert_eq!(
            runner.count(&[
                "ddev",
                "composer",
                "require",
                "drupal/admin_toolbar",
                "drupal/pathauto",
                "drupal/token",
            ]),
            1
        );
        assert_eq!(
            runner.count(&["ddev", "drush", "pm:enable", "-y", "admin_toolbar", "pathauto", "token"]),
            1
        );
    }

    #[test]
    fn files_directory_action_satisfies_its_probe() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(
            crate::steps::probes::files_directory(&ctx),
            crate::core::types::StateResult::Unsatisfied
        );
        assert_eq!(create_files_directory(&ctx), ActionResult::Success);
        assert_eq!(
            crate::steps::probes::files_directory(&ctx),
            crate::core::types::StateResult::Satisfied
        );
    }

    #[test]
    fn settings_protection_requires_the_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(
            failure_kind(protect_settings(&ctx)),
            Some(FailureKind::Precondition)
        );

        assert_eq!(create_files_directory(&ctx), ActionResult::Success);
        let settings = settings_file(&ctx);
        fs::write(&settings, "<?php\n").expect("write");
        assert_eq!(protect_settings(&ctx), ActionResult::Success);
        assert!(
            fs::metadata(&settings)
                .expect("metadata")
                .permissions()
                .readonly()
        );
    }
}
