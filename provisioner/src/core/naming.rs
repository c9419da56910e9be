//! Project-name validation and unique instance-name derivation.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use crate::errors::ProvisionError;

/// Container-manager project names double as hostnames.
const MAX_NAME_LEN: usize = 63;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*$").unwrap());

/// Validate a requested project name.
pub fn validate_project_name(name: &str) -> Result<(), ProvisionError> {
    let invalid = |reason: &str| ProvisionError::InvalidProjectName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("must be at most 63 characters"));
    }
    if !NAME_RE.is_match(name) {
        return Err(invalid(
            "use letters, digits and '-' only, starting with a letter or digit",
        ));
    }
    Ok(())
}

/// Candidate name for attempt `n` (0-based): `base`, `base1`, `base2`, ...
pub fn candidate_name(base: &str, n: u32) -> String {
    if n == 0 {
        base.to_string()
    } else {
        format!("{base}{n}")
    }
}

/// Derive the first candidate name that `is_taken` reports as free.
///
/// At most `max_attempts` candidates are probed. Errors from `is_taken` abort the
/// search unchanged.
pub fn resolve_unique_name<F>(base: &str, max_attempts: u32, mut is_taken: F) -> Result<String>
where
    F: FnMut(&str) -> Result<bool>,
{
    for n in 0..max_attempts {
        let candidate = candidate_name(base, n);
        if !is_taken(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(ProvisionError::NamesExhausted {
        base: base.to_string(),
        attempts: max_attempts,
    }
    .into())
}

/// Database engines whose volume `ddev` names `<instance>-<engine>`.
const DB_VOLUME_SUFFIXES: [&str; 3] = ["mariadb", "mysql", "postgres"];

/// Whether `volume` is one `ddev` created for `instance`.
///
/// Docker's `name=` filter matches substrings, so `blog` would also catch
/// `blog1-mariadb` or `myblog-mariadb`. Only exact owned names pass: the
/// database volume, the snapshot volume and volumes of the `ddev-<instance>`
/// compose project.
pub fn volume_owned_by(instance: &str, volume: &str) -> bool {
    if let Some(engine) = volume
        .strip_prefix(instance)
        .and_then(|rest| rest.strip_prefix('-'))
    {
        return DB_VOLUME_SUFFIXES.contains(&engine);
    }
    let Some(rest) = volume
        .strip_prefix("ddev-")
        .and_then(|rest| rest.strip_prefix(instance))
    else {
        return false;
    };
    rest == "-snapshots" || rest.strip_prefix('_').is_some_and(|name| !name.is_empty())
}
