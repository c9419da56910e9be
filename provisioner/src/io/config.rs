//! Provisioner settings (`provision.toml`) and the resolved run configuration.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Settings file looked up in the base directory when `--config` is not given.
pub const DEFAULT_SETTINGS_FILE: &str = "provision.toml";

/// Environment variable supplying the auth token when `--token` is absent.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Project name used when none is given on the command line.
pub const DEFAULT_PROJECT: &str = "drupal-site";

/// Tunable provisioning settings (TOML).
///
/// Every field has a default, so the file is optional and may list only the
/// values that differ.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// `ddev config --project-type` value.
    pub project_type: String,
    /// Web root relative to the project directory.
    pub docroot: String,
    /// Composer project template passed to `create-project`.
    pub recipe: String,
    /// Package whose presence in `composer.json` marks the codebase as present.
    pub core_package: String,
    pub install_profile: String,
    /// Site name for the install; defaults to the project name.
    pub site_name: Option<String>,
    pub admin_user: String,
    /// Configuration sync directory relative to the project directory.
    pub config_sync_dir: String,
    pub modules: Vec<ModuleSpec>,

    pub command_timeout_secs: u64,
    /// Timeout for downloads and the site install.
    pub long_command_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub retry_delay_secs: u64,
    /// Attempts at starting the container runtime or environment.
    pub runtime_start_attempts: u32,
    /// Passes of the storage-volume removal loop during `--clean`.
    pub volume_cleanup_attempts: u32,
    /// Candidate names probed before giving up on a unique instance name.
    pub name_attempt_limit: u32,
    pub output_limit_bytes: usize,

    /// Command that starts the container runtime daemon.
    pub runtime_start_command: Vec<String>,
    /// Host package manager install command; the package name is appended.
    pub package_install_command: Vec<String>,
}

/// A contributed module: Composer package plus machine name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleSpec {
    pub package: String,
    pub machine_name: String,
}

impl ModuleSpec {
    fn new(package: &str, machine_name: &str) -> Self {
        Self {
            package: package.to_string(),
            machine_name: machine_name.to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_type: "drupal11".to_string(),
            docroot: "web".to_string(),
            recipe: "drupal/recommended-project".to_string(),
            core_package: "drupal/core-recommended".to_string(),
            install_profile: "standard".to_string(),
            site_name: None,
            admin_user: "admin".to_string(),
            config_sync_dir: "config/sync".to_string(),
            modules: vec![
                ModuleSpec::new("drupal/admin_toolbar", "admin_toolbar"),
                ModuleSpec::new("drupal/pathauto", "pathauto"),
                ModuleSpec::new("drupal/token", "token"),
            ],
            command_timeout_secs: 600,
            long_command_timeout_secs: 30 * 60,
            probe_timeout_secs: 60,
            retry_delay_secs: 5,
            runtime_start_attempts: 3,
            volume_cleanup_attempts: 5,
            name_attempt_limit: 1000,
            output_limit_bytes: 1_000_000,
            runtime_start_command: default_runtime_start_command(),
            package_install_command: default_package_install_command(),
        }
    }
}

fn default_runtime_start_command() -> Vec<String> {
    let argv: &[&str] = if cfg!(target_os = "macos") {
        &["open", "-a", "Docker"]
    } else {
        &["sudo", "systemctl", "start", "docker"]
    };
    argv.iter().map(|s| s.to_string()).collect()
}

fn default_package_install_command() -> Vec<String> {
    let argv: &[&str] = if cfg!(target_os = "macos") {
        &["brew", "install"]
    } else {
        &["sudo", "apt-get", "install", "-y"]
    };
    argv.iter().map(|s| s.to_string()).collect()
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("project_type", &self.project_type),
            ("docroot", &self.docroot),
            ("recipe", &self.recipe),
            ("core_package", &self.core_package),
            ("install_profile", &self.install_profile),
            ("admin_user", &self.admin_user),
            ("config_sync_dir", &self.config_sync_dir),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{field} must not be empty"));
            }
        }
        if self.command_timeout_secs == 0
            || self.long_command_timeout_secs == 0
            || self.probe_timeout_secs == 0
        {
            return Err(anyhow!("timeouts must be > 0"));
        }
        if self.runtime_start_attempts == 0 {
            return Err(anyhow!("runtime_start_attempts must be > 0"));
        }
        if self.volume_cleanup_attempts == 0 {
            return Err(anyhow!("volume_cleanup_attempts must be > 0"));
        }
        if self.name_attempt_limit == 0 {
            return Err(anyhow!("name_attempt_limit must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.runtime_start_command.is_empty() || self.runtime_start_command[0].trim().is_empty()
        {
            return Err(anyhow!("runtime_start_command must be a non-empty array"));
        }
        if self.package_install_command.is_empty()
            || self.package_install_command[0].trim().is_empty()
        {
            return Err(anyhow!("package_install_command must be a non-empty array"));
        }
        for module in &self.modules {
            if module.package.trim().is_empty() || module.machine_name.trim().is_empty() {
                return Err(anyhow!("modules entries need package and machine_name"));
            }
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn long_command_timeout(&self) -> Duration {
        Duration::from_secs(self.long_command_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `Settings::default()`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        debug!(path = %path.display(), "no settings file, using defaults");
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("invalid settings in {}", path.display()))?;
    debug!(path = %path.display(), "settings loaded");
    Ok(settings)
}

/// Auth token that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Caller-supplied inputs before name resolution.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub project: String,
    pub base_dir: PathBuf,
    pub interactive: bool,
    pub clean: bool,
    pub resume: bool,
    pub token: Option<Secret>,
    pub settings: Settings,
}

impl RunRequest {
    /// Anchor a relative `base_dir` at the current directory.
    ///
    /// `ddev` reports absolute app roots; a relative base would never match them.
    pub fn with_absolute_base(mut self) -> Result<Self> {
        self.base_dir = std::path::absolute(&self.base_dir)
            .with_context(|| format!("resolve {}", self.base_dir.display()))?;
        Ok(self)
    }

    /// Bind the request to a resolved instance name.
    pub fn into_config(self, instance: String) -> RunConfig {
        let workdir = self.base_dir.join(&instance);
        RunConfig {
            project: self.project,
            instance,
            base_dir: self.base_dir,
            workdir,
            interactive: self.interactive,
            clean: self.clean,
            resume: self.resume,
            token: self.token,
            settings: self.settings,
        }
    }
}

/// Resolved, immutable settings for one provisioning run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Project name as requested on the command line.
    pub project: String,
    /// Unique instance name derived from `project`.
    pub instance: String,
    /// Directory the working directory lives in.
    pub base_dir: PathBuf,
    /// `<base_dir>/<instance>`.
    pub workdir: PathBuf,
    pub interactive: bool,
    pub clean: bool,
    pub resume: bool,
    pub token: Option<Secret>,
    pub settings: Settings,
}

impl RunConfig {
    /// Path inside the web root (`<workdir>/<docroot>/<relative>`).
    pub fn docroot_path(&self, relative: &str) -> PathBuf {
        self.workdir.join(&self.settings.docroot).join(relative)
    }

    pub fn site_name(&self) -> &str {
        self.settings.site_name.as_deref().unwrap_or(&self.project)
    }
}
