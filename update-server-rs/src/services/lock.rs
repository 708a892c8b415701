//! Advisory lock guarding the installation tree.

use crate::error::UpdateError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Exclusive advisory lock held for the duration of one pipeline phase.
/// Two admins triggering updates against the same installation contend on
/// the same lock file, so a second phase fails fast instead of corrupting
/// the shared session artifacts. Released on drop.
#[derive(Debug)]
pub struct PipelineLock {
    file: File,
}

impl PipelineLock {
    pub fn acquire(path: &Path) -> Result<Self, UpdateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| UpdateError::UpdateInProgress)?;
        Ok(Self { file })
    }
}

impl Drop for PipelineLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
