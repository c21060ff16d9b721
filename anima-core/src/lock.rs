//! Process-exclusive driver lock: an advisory `flock` on a well-known
//! lock file, held for the lifetime of a `start` run so two driver
//! processes never operate on the same project concurrently.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{AnimaError, Result};

/// An acquired exclusive lock on `anima.lock`. Released on drop (any exit
/// path — normal return, `?`, or panic unwind).
pub struct DriverLock {
    file: File,
    path: PathBuf,
}

impl DriverLock {
    /// Attempts to acquire the lock at `path`, creating the file if
    /// needed. Fails with `AnimaError::LockHeld` if another process holds
    /// it.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AnimaError::PersistenceFailure {
                what: "lock directory".to_string(),
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| AnimaError::PersistenceFailure {
                what: "lock file".to_string(),
                path: path.clone(),
                source,
            })?;

        file.try_lock_exclusive()
            .map_err(|_| AnimaError::LockHeld { path: path.clone() })?;

        Ok(Self { file, path })
    }
}

impl Drop for DriverLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

pub fn default_lock_path(anima_dir: &Path) -> PathBuf {
    anima_dir.join("anima.lock")
}
