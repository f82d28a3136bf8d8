//! Single-writer guard for the statistics document
//!
//! Scheduled runs must not overlap. The lock is a sibling file created with
//! `create_new`; it holds the run id and is removed when the guard drops.

use crate::error::PipelineError;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock next to `state_path` (`<state_path>.lock`)
    pub fn acquire(state_path: &Path, run_id: &str) -> Result<Self, PipelineError> {
        let path = crate::stats::sibling_path(state_path, "lock");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PipelineError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Best effort: the lock is the file's existence, not its content.
                let _ = writeln!(file, "{}", run_id);
                debug!(path = %path.display(), run_id, "Run lock acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                warn!(
                    path = %path.display(),
                    holder = holder.trim(),
                    "Run lock is held; remove it manually if that run is gone"
                );
                Err(PipelineError::Locked(path))
            }
            Err(source) => Err(PipelineError::Write { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}
