//! Restores the installation tree from a backup archive.

use crate::error::UpdateError;
use crate::services::archive;
use std::path::Path;

/// Extracts the backup over the live tree, overwriting every file present
/// in the backup. Files created after the backup was taken are left in
/// place: rollback restores what the backup holds, it does not wipe the
/// tree first. That is the documented contract, not an oversight.
pub fn rollback(backup_archive_path: &str, install_root: &Path) -> Result<(), UpdateError> {
    if backup_archive_path.is_empty() {
        return Err(UpdateError::BackupNotFound(
            "No backup archive recorded for this session".into(),
        ));
    }
    let archive_path = Path::new(backup_archive_path);
    if !archive_path.is_file() {
        return Err(UpdateError::BackupNotFound(format!(
            "Backup archive missing on disk: {backup_archive_path}"
        )));
    }

    archive::extract(archive_path, install_root)?;
    tracing::info!(
        "Restored {} from {}",
        install_root.display(),
        backup_archive_path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backup::{create_backup, BACKUP_EXCLUDES};
    use std::fs;
    use tempfile::TempDir;

    fn write_file(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn rollback_restores_backed_up_files() {
        let root = TempDir::new().unwrap();
        write_file(root.path(), "index.php", b"v1");
        write_file(root.path(), "app/lib/util.php", b"v1");

        let backups = root.path().join("backups");
        let outcome = create_backup(root.path(), &backups, BACKUP_EXCLUDES).unwrap();

        // A later install mutates the tree and adds a file.
        write_file(root.path(), "index.php", b"v2-broken");
        write_file(root.path(), "app/new-module.php", b"v2");

        rollback(outcome.archive_path.to_str().unwrap(), root.path()).unwrap();

        assert_eq!(fs::read(root.path().join("index.php")).unwrap(), b"v1");
        assert_eq!(
            fs::read(root.path().join("app/lib/util.php")).unwrap(),
            b"v1"
        );
        // Not in the backup, so rollback leaves it alone.
        assert_eq!(
            fs::read(root.path().join("app/new-module.php")).unwrap(),
            b"v2"
        );
    }

    #[test]
    fn empty_backup_path_fails_with_backup_not_found() {
        let root = TempDir::new().unwrap();
        let err = rollback("", root.path()).unwrap_err();
        assert!(matches!(err, UpdateError::BackupNotFound(_)));
    }

    #[test]
    fn missing_backup_archive_fails_with_backup_not_found() {
        let root = TempDir::new().unwrap();
        let err = rollback("/backups/no-such-backup.zip", root.path()).unwrap_err();
        assert!(matches!(err, UpdateError::BackupNotFound(_)));
    }
}
