//! Checkpoint marker file (`<workdir>/.provision-state`).
//!
//! One `step.<id>=<key>` line per completed step. The file is a hint for
//! `--resume` diagnostics only: live probes always decide whether a step runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

pub const CHECKPOINT_FILE: &str = ".provision-state";

const KEY_PREFIX: &str = "step.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    completed: BTreeMap<u32, String>,
}

impl Checkpoint {
    pub fn path_in(workdir: &Path) -> PathBuf {
        workdir.join(CHECKPOINT_FILE)
    }

    /// Parse the line-oriented key=value format, ignoring lines it does not understand.
    pub fn parse(contents: &str) -> Self {
        let mut completed = BTreeMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(line, "ignoring malformed checkpoint line");
                continue;
            };
            let Some(id) = key
                .trim()
                .strip_prefix(KEY_PREFIX)
                .and_then(|id| id.parse::<u32>().ok())
            else {
                warn!(line, "ignoring unknown checkpoint key");
                continue;
            };
            completed.insert(id, value.trim().to_string());
        }
        Self { completed }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (id, key) in &self.completed {
            out.push_str(&format!("{KEY_PREFIX}{id}={key}\n"));
        }
        out
    }

    pub fn is_recorded(&self, id: u32) -> bool {
        self.completed.contains_key(&id)
    }

    pub fn recorded_ids(&self) -> Vec<u32> {
        self.completed.keys().copied().collect()
    }

    pub fn record(&mut self, id: u32, key: &str) {
        self.completed.insert(id, key.to_string());
    }

    /// Drop an entry the live state contradicts. Returns whether it was present.
    pub fn forget(&mut self, id: u32) -> bool {
        self.completed.remove(&id).is_some()
    }
}

/// Load the checkpoint from `workdir`; a missing file is an empty checkpoint.
pub fn load_checkpoint(workdir: &Path) -> Result<Checkpoint> {
    let path = Checkpoint::path_in(workdir);
    if !path.exists() {
        return Ok(Checkpoint::default());
    }
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read checkpoint {}", path.display()))?;
    let checkpoint = Checkpoint::parse(&contents);
    debug!(path = %path.display(), steps = ?checkpoint.recorded_ids(), "checkpoint loaded");
    Ok(checkpoint)
}

/// Atomically write the checkpoint (temp file + rename).
///
/// Does nothing while the working directory does not exist yet.
pub fn write_checkpoint(workdir: &Path, checkpoint: &Checkpoint) -> Result<()> {
    if !workdir.is_dir() {
        debug!(workdir = %workdir.display(), "workdir missing, checkpoint not written");
        return Ok(());
    }
    let path = Checkpoint::path_in(workdir);
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, checkpoint.render())
        .with_context(|| format!("write temp checkpoint {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path)
        .with_context(|| format!("replace checkpoint {}", path.display()))?;
    Ok(())
}
