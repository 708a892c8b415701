//! Point-in-time snapshot of the installation tree.

use crate::error::UpdateError;
use crate::services::archive;
use std::path::{Path, PathBuf};

/// Top-level directories never included in a backup: state written by the
/// pipeline itself, upload scratch space, dependency caches and VCS
/// metadata. Matched against the first path component relative to the
/// install root, never against nested directories with the same name.
pub const BACKUP_EXCLUDES: &[&str] = &[
    "backups",
    "updates",
    "temp",
    "uploads",
    "node_modules",
    ".git",
];

#[derive(Debug)]
pub struct BackupOutcome {
    pub archive_path: PathBuf,
    pub files_count: usize,
}

/// Snapshots `install_root` (minus `excludes`) into a timestamped zip under
/// `backups_dir`. This must succeed before any destructive phase runs; the
/// phase gate in the route layer enforces that ordering.
pub fn create_backup(
    install_root: &Path,
    backups_dir: &Path,
    excludes: &[&str],
) -> Result<BackupOutcome, UpdateError> {
    std::fs::create_dir_all(backups_dir).map_err(|e| {
        UpdateError::BackupCreation(format!("Cannot create {}: {}", backups_dir.display(), e))
    })?;

    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let archive_path = backups_dir.join(format!("backup_{stamp}.zip"));

    let files_count = archive::create(install_root, &archive_path, excludes)
        .map_err(|e| UpdateError::BackupCreation(e.to_string()))?;

    tracing::info!(
        "Created backup {} ({} files)",
        archive_path.display(),
        files_count
    );
    Ok(BackupOutcome {
        archive_path,
        files_count,
    })
}
