//! Narrow interpretations of external tool output.
//!
//! Each function answers one question about canned text, so probes can be
//! tested without the real tools. JSON output is deserialized with `serde_json`
//! and only the fields a probe needs are read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

/// `.ddev/config.yaml` declares `name: <name>` at top level.
pub fn config_declares_name(yaml: &str, name: &str) -> bool {
    yaml.lines().any(|line| {
        let Some(value) = line.strip_prefix("name:") else {
            return false;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        value == name
    })
}

/// Project fields from `ddev describe -j`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProjectDescription {
    #[serde(default)]
    pub approot: Option<PathBuf>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Deserialize)]
struct DescribeRecord {
    raw: ProjectDescription,
}

/// Parse `ddev describe -j` output.
///
/// `ddev` writes one JSON record per line and the project lives under `raw`
/// in the last such record. Service entries nested deeper are ignored.
pub fn parse_describe(output: &str) -> Option<ProjectDescription> {
    if let Ok(record) = serde_json::from_str::<DescribeRecord>(output) {
        return Some(record.raw);
    }
    output
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<DescribeRecord>(line.trim()).ok())
        .map(|record| record.raw)
}

/// `ddev describe -j` output reports the project itself as running.
pub fn describe_reports_running(output: &str) -> bool {
    parse_describe(output).is_some_and(|project| project.status.as_deref() == Some("running"))
}

/// App root named by `ddev describe -j` output.
pub fn describe_approot(output: &str) -> Option<PathBuf> {
    parse_describe(output).and_then(|project| project.approot)
}

/// `ddev describe -j` output names `approot` as the app root.
pub fn describe_approot_is(output: &str, approot: &Path) -> bool {
    describe_approot(output).is_some_and(|reported| reported == approot)
}

/// `drush status --field=bootstrap` reports a bootstrapped site.
pub fn bootstrap_successful(output: &str) -> bool {
    output.to_ascii_lowercase().contains("successful")
}

#[derive(Deserialize)]
struct ComposerManifest {
    #[serde(default)]
    require: BTreeMap<String, Value>,
}

/// `composer.json` lists `package` under `require`.
///
/// `require-dev`, `conflict` and other sections do not count; unparseable
/// contents require nothing.
pub fn composer_requires(composer_json: &str, package: &str) -> bool {
    serde_json::from_str::<ComposerManifest>(composer_json)
        .is_ok_and(|manifest| manifest.require.contains_key(package))
}

/// A one-item-per-line listing contains every name in `wanted`.
pub fn lists_all<S: AsRef<str>>(listing: &str, wanted: &[S]) -> bool {
    wanted.iter().all(|name| {
        listing
            .lines()
            .any(|line| line.trim() == name.as_ref().trim())
    })
}

/// First non-empty line of a command's output, if any.
pub fn first_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).find(|line| !line.is_empty())
}

/// Non-empty trimmed lines (e.g. `docker volume ls -q`).
pub fn non_empty_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
