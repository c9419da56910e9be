//! Advisory lock guarding one instance against concurrent provisioning runs.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::debug;

use crate::errors::ProvisionError;

/// Exclusive lock held for the lifetime of the value.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Lock file for `instance`, kept next to (not inside) its working directory
    /// so `--clean` can remove the directory while the lock is held. The file is
    /// left in place on release; only the lock on it matters.
    pub fn path_for(base_dir: &Path, instance: &str) -> PathBuf {
        base_dir.join(format!(".{instance}.provision.lock"))
    }

    /// Take the lock without waiting; a held lock is a [`ProvisionError::Locked`].
    pub fn acquire(base_dir: &Path, instance: &str) -> Result<Self> {
        let path = Self::path_for(base_dir, instance);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        if file.try_lock_exclusive().is_err() {
            return Err(ProvisionError::Locked { path }.into());
        }
        debug!(path = %path.display(), "lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
