//! Exclusive advisory lock serializing worker processes on one snapshot.
//!
//! The in-process mutex only orders tasks inside one process. Two worker
//! processes sharing a snapshot would each load it, claim the same keys in
//! their own memory and overwrite each other's save. Holding this lock from
//! load through save makes overlapping processes run one after another.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tally_core::RepositoryError;

/// Held for the lifetime of a worker invocation; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Sidecar lock file for a snapshot: `<snapshot>.lock`.
    pub fn path_for(snapshot: &Path) -> PathBuf {
        let mut name = snapshot.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Block until the lock for `snapshot` is free, then take it.
    pub fn acquire(snapshot: &Path) -> Result<Self, RepositoryError> {
        let path = Self::path_for(snapshot);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        tracing::debug!(path = %path.display(), "Waiting for store lock");
        FileExt::lock_exclusive(&file)?;
        tracing::debug!(path = %path.display(), "Store lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release store lock");
        }
    }
}
