//! State Probe Set: one read-only probe per step.
//!
//! Probes never change anything. When a query cannot answer (the tool did not
//! start, timed out, or a file could not be read) the probe reports
//! [`StateResult::Indeterminate`] and the step runs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::parse::{
    bootstrap_successful, composer_requires, config_declares_name, describe_reports_running,
    first_line, lists_all,
};
use crate::core::types::StateResult;
use crate::io::checkpoint::CHECKPOINT_FILE;
use crate::io::cleanup::DOCKER;
use crate::io::process::{CommandOutput, CommandSpec, ExitState};
use crate::steps::StepContext;

pub const MKCERT: &str = "mkcert";

/// Entries that mark a directory as created by an earlier run.
const RECOGNIZED_ENTRIES: [&str; 3] = [".ddev", "composer.json", CHECKPOINT_FILE];

/// What occupies the working directory path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirState {
    Missing,
    NotADirectory,
    Empty,
    /// Holds files from an earlier provisioning run.
    Recognized,
    /// Holds files this tool did not create.
    Foreign,
}

pub(crate) fn directory_state(path: &Path) -> io::Result<DirState> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(DirState::Missing),
        Err(err) => return Err(err),
    };
    if !metadata.is_dir() {
        return Ok(DirState::NotADirectory);
    }
    let mut empty = true;
    for entry in fs::read_dir(path)? {
        let name = entry?.file_name();
        if RECOGNIZED_ENTRIES.iter().any(|known| name == *known) {
            return Ok(DirState::Recognized);
        }
        empty = false;
    }
    Ok(if empty {
        DirState::Empty
    } else {
        DirState::Foreign
    })
}

/// Map a query that did not run to completion onto `Indeterminate`.
fn unfinished(output: &CommandOutput, spec_display: &str) -> Option<StateResult> {
    match &output.status {
        ExitState::Exited(_) => None,
        ExitState::TimedOut => Some(StateResult::indeterminate(format!(
            "`{spec_display}` timed out"
        ))),
        ExitState::Signalled => Some(StateResult::indeterminate(format!(
            "`{spec_display}` was terminated by a signal"
        ))),
        ExitState::SpawnFailed(err) => Some(StateResult::indeterminate(format!(
            "`{spec_display}` could not be started: {err}"
        ))),
    }
}

fn read_if_present(path: &Path) -> Result<Option<String>, StateResult> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StateResult::indeterminate(format!(
            "cannot read {}: {err}",
            path.display()
        ))),
    }
}

fn composer_json(ctx: &StepContext<'_>) -> PathBuf {
    ctx.config.workdir.join("composer.json")
}

pub(crate) fn settings_file(ctx: &StepContext<'_>) -> PathBuf {
    ctx.config.docroot_path("sites/default/settings.php")
}

pub(crate) fn files_dir(ctx: &StepContext<'_>) -> PathBuf {
    ctx.config.docroot_path("sites/default/files")
}

pub fn container_runtime(ctx: &StepContext<'_>) -> StateResult {
    let spec = CommandSpec::new(DOCKER)
        .arg("info")
        .timeout(ctx.config.settings.probe_timeout());
    let output = ctx.runner.run(&spec);
    if let Some(state) = unfinished(&output, &spec.display()) {
        return state;
    }
    StateResult::from_bool(output.success())
}

pub fn local_certificates(ctx: &StepContext<'_>) -> StateResult {
    if ctx.runner.locate(MKCERT).is_none() {
        return StateResult::indeterminate("mkcert is not installed");
    }
    let spec = CommandSpec::new(MKCERT)
        .arg("-CAROOT")
        .timeout(ctx.config.settings.probe_timeout());
    let output = ctx.runner.run(&spec);
    if let Some(state) = unfinished(&output, &spec.display()) {
        return state;
    }
    if !output.success() {
        return StateResult::Unsatisfied;
    }
    match first_line(&output.stdout) {
        Some(dir) => StateResult::from_bool(Path::new(dir).join("rootCA.pem").is_file()),
        None => StateResult::Unsatisfied,
    }
}

pub fn project_directory(ctx: &StepContext<'_>) -> StateResult {
    match directory_state(&ctx.config.workdir) {
        Ok(DirState::Empty | DirState::Recognized) => StateResult::Satisfied,
        Ok(state) => {
            debug!(?state, "working directory not usable yet");
            StateResult::Unsatisfied
        }
        Err(err) => StateResult::indeterminate(format!(
            "cannot inspect {}: {err}",
            ctx.config.workdir.display()
        )),
    }
}

pub fn ddev_config(ctx: &StepContext<'_>) -> StateResult {
    let path = ctx.config.workdir.join(".ddev").join("config.yaml");
    match read_if_present(&path) {
        Ok(Some(yaml)) => StateResult::from_bool(config_declares_name(&yaml, &ctx.config.instance)),
        Ok(None) => StateResult::Unsatisfied,
        Err(state) => state,
    }
}

pub fn ddev_running(ctx: &StepContext<'_>) -> StateResult {
    let output = ctx.ddev().describe(&ctx.config.instance);
    if let Some(state) = unfinished(&output, "ddev describe") {
        return state;
    }
    StateResult::from_bool(output.success() && describe_reports_running(&output.stdout))
}

pub fn composer_auth(ctx: &StepContext<'_>) -> StateResult {
    let Some(token) = &ctx.config.token else {
        return StateResult::Satisfied;
    };
    let output = ctx
        .ddev()
        .query(&["composer", "config", "--global", "github-oauth.github.com"]);
    if let Some(state) = unfinished(&output, "ddev composer config") {
        return state;
    }
    let configured = output.success() && first_line(&output.stdout) == Some(token.expose());
    StateResult::from_bool(configured)
}

pub fn cms_codebase(ctx: &StepContext<'_>) -> StateResult {
    match read_if_present(&composer_json(ctx)) {
        Ok(Some(json)) => {
            StateResult::from_bool(composer_requires(&json, &ctx.config.settings.core_package))
        }
        Ok(None) => StateResult::Unsatisfied,
        Err(state) => state,
    }
}

pub fn drush_installed(ctx: &StepContext<'_>) -> StateResult {
    let drush = ctx.config.workdir.join("vendor").join("bin").join("drush");
    StateResult::from_bool(drush.is_file())
}

pub fn site_installed(ctx: &StepContext<'_>) -> StateResult {
    let output = ctx.ddev().query(&["drush", "status", "--field=bootstrap"]);
    if let Some(state) = unfinished(&output, "ddev drush status") {
        return state;
    }
    StateResult::from_bool(output.success() && bootstrap_successful(&output.stdout))
}

pub fn files_directory(ctx: &StepContext<'_>) -> StateResult {
    let path = files_dir(ctx);
    match fs::metadata(&path) {
        Ok(metadata) => StateResult::from_bool(metadata.is_dir() && group_writable(&metadata)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => StateResult::Unsatisfied,
        Err(err) => {
            StateResult::indeterminate(format!("cannot inspect {}: {err}", path.display()))
        }
    }
}

pub fn modules_downloaded(ctx: &StepContext<'_>) -> StateResult {
    let modules = &ctx.config.settings.modules;
    if modules.is_empty() {
        return StateResult::Satisfied;
    }
    match read_if_present(&composer_json(ctx)) {
        Ok(Some(json)) => StateResult::from_bool(
            modules
                .iter()
                .all(|module| composer_requires(&json, &module.package)),
        ),
        Ok(None) => StateResult::Unsatisfied,
        Err(state) => state,
    }
}

pub fn modules_enabled(ctx: &StepContext<'_>) -> StateResult {
    let modules = &ctx.config.settings.modules;
    if modules.is_empty() {
        return StateResult::Satisfied;
    }
    let output = ctx.ddev().query(&[
        "drush",
        "pm:list",
        "--status=enabled",
        "--type=module",
        "--format=list",
    ]);
    if let Some(state) = unfinished(&output, "ddev drush pm:list") {
        return state;
    }
    let names: Vec<&str> = modules.iter().map(|m| m.machine_name.as_str()).collect();
    StateResult::from_bool(output.success() && lists_all(&output.stdout, &names))
}

pub fn settings_protected(ctx: &StepContext<'_>) -> StateResult {
    let path = settings_file(ctx);
    match fs::metadata(&path) {
        Ok(metadata) => StateResult::from_bool(write_protected(&metadata)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            StateResult::indeterminate(format!("{} does not exist", path.display()))
        }
        Err(err) => {
            StateResult::indeterminate(format!("cannot inspect {}: {err}", path.display()))
        }
    }
}

pub fn config_exported(ctx: &StepContext<'_>) -> StateResult {
    let marker = ctx
        .config
        .workdir
        .join(&ctx.config.settings.config_sync_dir)
        .join("system.site.yml");
    StateResult::from_bool(marker.is_file())
}

#[cfg(unix)]
fn group_writable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o020 != 0
}

#[cfg(not(unix))]
fn group_writable(metadata: &fs::Metadata) -> bool {
    !metadata.permissions().readonly()
}

#[cfg(unix)]
fn write_protected(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o222 == 0
}

#[cfg(not(unix))]
fn write_protected(metadata: &fs::Metadata) -> bool {
    metadata.permissions().readonly()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::Secret;
    use crate::test_support::{ScriptedRunner, run_config};

    #[test]
    fn runtime_probe_follows_docker_info() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(container_runtime(&ctx), StateResult::Satisfied);

        runner.on(&["docker", "info"], CommandOutput::exited(1, "", "daemon down"));
        assert_eq!(container_runtime(&ctx), StateResult::Unsatisfied);

        runner.on(&["docker", "info"], CommandOutput::with_status(ExitState::TimedOut));
        assert!(matches!(
            container_runtime(&ctx),
            StateResult::Indeterminate { .. }
        ));
    }

    #[test]
    fn certificates_need_root_ca_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let caroot = temp.path().join("caroot");
        fs::create_dir_all(&caroot).expect("caroot");
        let runner = ScriptedRunner::new();
        runner.on(
            &["mkcert", "-CAROOT"],
            CommandOutput::exited(0, format!("{}\n", caroot.display()), ""),
        );
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(local_certificates(&ctx), StateResult::Unsatisfied);
        fs::write(caroot.join("rootCA.pem"), "pem").expect("write");
        assert_eq!(local_certificates(&ctx), StateResult::Satisfied);

        runner.missing("mkcert");
        assert!(matches!(
            local_certificates(&ctx),
            StateResult::Indeterminate { .. }
        ));
    }

    #[test]
    fn directory_states() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("blog");
        assert_eq!(directory_state(&dir).expect("state"), DirState::Missing);

        fs::create_dir(&dir).expect("mkdir");
        assert_eq!(directory_state(&dir).expect("state"), DirState::Empty);

        fs::write(dir.join("notes.txt"), "mine").expect("write");
        assert_eq!(directory_state(&dir).expect("state"), DirState::Foreign);

        fs::create_dir(dir.join(".ddev")).expect("mkdir");
        assert_eq!(directory_state(&dir).expect("state"), DirState::Recognized);

        let file = temp.path().join("plain");
        fs::write(&file, "").expect("write");
        assert_eq!(
            directory_state(&file).expect("state"),
            DirState::NotADirectory
        );
    }

    #[test]
    fn project_directory_rejects_foreign_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(project_directory(&ctx), StateResult::Unsatisfied);
        fs::create_dir_all(&config.workdir).expect("mkdir");
        assert_eq!(project_directory(&ctx), StateResult::Satisfied);
        fs::write(config.workdir.join("index.html"), "hi").expect("write");
        assert_eq!(project_directory(&ctx), StateResult::Unsatisfied);
    }

    #[test]
    fn ddev_config_must_name_this_instance() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog1");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(ddev_config(&ctx), StateResult::Unsatisfied);
        let ddev_dir = config.workdir.join(".ddev");
        fs::create_dir_all(&ddev_dir).expect("mkdir");
        fs::write(ddev_dir.join("config.yaml"), "name: blog\n").expect("write");
        assert_eq!(ddev_config(&ctx), StateResult::Unsatisfied);
        fs::write(ddev_dir.join("config.yaml"), "name: blog1\ntype: drupal11\n").expect("write");
        assert_eq!(ddev_config(&ctx), StateResult::Satisfied);
    }

    #[test]
    fn ddev_running_reads_describe_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        runner.on(&["ddev", "describe"], CommandOutput::exited(1, "", "no project"));
        assert_eq!(ddev_running(&ctx), StateResult::Unsatisfied);

        runner.on(
            &["ddev", "describe"],
            CommandOutput::exited(0, r#"{"raw":{"status":"stopped"}}"#, ""),
        );
        assert_eq!(ddev_running(&ctx), StateResult::Unsatisfied);

        runner.on(
            &["ddev", "describe"],
            CommandOutput::exited(0, r#"{"raw":{"status":"running"}}"#, ""),
        );
        assert_eq!(ddev_running(&ctx), StateResult::Satisfied);
    }

    #[test]
    fn composer_auth_without_token_is_satisfied() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        assert_eq!(
            composer_auth(&StepContext::new(&config, &runner)),
            StateResult::Satisfied
        );
        assert_eq!(runner.count(&["ddev", "composer"]), 0);

        config.token = Some(Secret::new("ghp_new"));
        runner.on(
            &["ddev", "composer", "config"],
            CommandOutput::exited(0, "ghp_old\n", ""),
        );
        assert_eq!(
            composer_auth(&StepContext::new(&config, &runner)),
            StateResult::Unsatisfied
        );
        runner.on(
            &["ddev", "composer", "config"],
            CommandOutput::exited(0, "ghp_new\n", ""),
        );
        assert_eq!(
            composer_auth(&StepContext::new(&config, &runner)),
            StateResult::Satisfied
        );
    }

    #[test]
    fn codebase_and_modules_read_composer_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(cms_codebase(&ctx), StateResult::Unsatisfied);
        assert_eq!(modules_downloaded(&ctx), StateResult::Unsatisfied);

        fs::create_dir_all(&config.workdir).expect("mkdir");
        fs::write(
            config.workdir.join("composer.json"),
            r#"{"require": {"drupal/core-recommended": "^11", "drupal/token": "^1"}}"#,
        )
        .expect("write");
        assert_eq!(cms_codebase(&ctx), StateResult::Satisfied);
        assert_eq!(modules_downloaded(&ctx), StateResult::Unsatisfied);

        fs::write(
            config.workdir.join("composer.json"),
            r#"{"require": {"drupal/core-recommended": "^11", "drupal/admin_toolbar": "^3",
                "drupal/pathauto": "^1", "drupal/token": "^1"}}"#,
        )
        .expect("write");
        assert_eq!(modules_downloaded(&ctx), StateResult::Satisfied);
    }

    #[test]
    fn site_install_needs_successful_bootstrap() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(site_installed(&ctx), StateResult::Unsatisfied);
        runner.on(
            &["ddev", "drush", "status"],
            CommandOutput::exited(0, "Successful\n", ""),
        );
        assert_eq!(site_installed(&ctx), StateResult::Satisfied);
    }

    #[test]
    fn enabled_modules_must_all_be_listed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        runner.on(
            &["ddev", "drush", "pm:list"],
            CommandOutput::exited(0, "admin_toolbar\nnode\ntoken\n", ""),
        );
        assert_eq!(modules_enabled(&ctx), StateResult::Unsatisfied);
        runner.on(
            &["ddev", "drush", "pm:list"],
            CommandOutput::exited(0, "admin_toolbar\nnode\npathauto\ntoken\n", ""),
        );
        assert_eq!(modules_enabled(&ctx), StateResult::Satisfied);
    }

    #[cfg(unix)]
    #[test]
    fn file_permission_probes() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert!(matches!(
            settings_protected(&ctx),
            StateResult::Indeterminate { .. }
        ));
        assert_eq!(files_directory(&ctx), StateResult::Unsatisfied);

        let files = files_dir(&ctx);
        fs::create_dir_all(&files).expect("mkdir");
        fs::set_permissions(&files, fs::Permissions::from_mode(0o755)).expect("chmod");
        assert_eq!(files_directory(&ctx), StateResult::Unsatisfied);
        fs::set_permissions(&files, fs::Permissions::from_mode(0o775)).expect("chmod");
        assert_eq!(files_directory(&ctx), StateResult::Satisfied);

        let settings = settings_file(&ctx);
        fs::write(&settings, "<?php\n").expect("write");
        fs::set_permissions(&settings, fs::Permissions::from_mode(0o644)).expect("chmod");
        assert_eq!(settings_protected(&ctx), StateResult::Unsatisfied);
        fs::set_permissions(&settings, fs::Permissions::from_mode(0o444)).expect("chmod");
        assert_eq!(settings_protected(&ctx), StateResult::Satisfied);
    }

    #[test]
    fn config_export_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = run_config(temp.path(), "blog");
        let runner = ScriptedRunner::new();
        let ctx = StepContext::new(&config, &runner);

        assert_eq!(config_exported(&ctx), StateResult::Unsatisfied);
        let sync = config.workdir.join("config/sync");
        fs::create_dir_all(&sync).expect("mkdir");
        fs::write(sync.join("system.site.yml"), "name: blog\n").expect("write");
        assert_eq!(config_exported(&ctx), StateResult::Satisfied);
    }
}
