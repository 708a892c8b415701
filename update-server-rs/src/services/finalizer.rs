//! Records the installed version and clears transient update artifacts.

use crate::models::update_session::{self, UpdateSession};
use crate::models::settings;
use rusqlite::Connection;
use std::path::Path;

/// Writes `version` into the settings store, removes the session's package
/// archive and extraction directory, and marks the session finalized. The
/// backup archive is deliberately kept for manual retention and rollback.
///
/// The settings write is best-effort: the new files are already live, so a
/// failed version record must not fail the update.
pub fn finalize(conn: &Connection, session: &UpdateSession, version: &str) -> anyhow::Result<()> {
    if let Err(e) = settings::set(conn, settings::APP_VERSION_KEY, version) {
        tracing::warn!("Cannot record version {}: {}", version, e);
    }

    remove_artifact_file(&session.package_archive_path);
    remove_artifact_dir(&session.extracted_package_path);

    update_session::clear_transient(conn, &session.id)?;
    tracing::info!("Finalized update to version {}", version);
    Ok(())
}

fn remove_artifact_file(path: &str) {
    if path.is_empty() {
        return;
    }
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Cannot remove package archive {}: {}", path, e);
        }
    }
}

fn remove_artifact_dir(path: &str) {
    if path.is_empty() || !Path::new(path).exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(path) {
        tracing::warn!("Cannot remove extraction directory {}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrate::apply_schema;
    use crate::models::update_session::UpdatePhase;
    use std::fs;
    use tempfile::TempDir;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn finalize_records_version_and_removes_artifacts() {
        let conn = test_conn();
        let dir = TempDir::new().unwrap();

        let package = dir.path().join("update_1.2.zip");
        fs::write(&package, b"zip").unwrap();
        let extracted = dir.path().join("update_x");
        fs::create_dir_all(extracted.join("app")).unwrap();
        fs::write(extracted.join("app/index.php"), b"new").unwrap();
        let backup = dir.path().join("backup_x.zip");
        fs::write(&backup, b"zip").unwrap();

        let session = update_session::create(&conn).unwrap();
        update_session::record_backup(&conn, &session.id, backup.to_str().unwrap()).unwrap();
        update_session::record_package(&conn, &session.id, package.to_str().unwrap(), "1.2")
            .unwrap();
        update_session::record_extracted(&conn, &session.id, extracted.to_str().unwrap()).unwrap();
        update_session::record_installed(&conn, &session.id).unwrap();

        let session = update_session::find_by_id(&conn, &session.id).unwrap().unwrap();
        finalize(&conn, &session, "1.2").unwrap();

        assert_eq!(
            settings::get(&conn, settings::APP_VERSION_KEY).unwrap().as_deref(),
            Some("1.2")
        );
        assert!(!package.exists());
        assert!(!extracted.exists());
        assert!(backup.exists());

        let session = update_session::find_by_id(&conn, &session.id).unwrap().unwrap();
        assert_eq!(session.phase, UpdatePhase::Finalized);
    }

    #[test]
    fn finalize_twice_is_idempotent() {
        let conn = test_conn();
        let session = update_session::create(&conn).unwrap();
        update_session::record_package(&conn, &session.id, "", "3.1.4").unwrap();
        update_session::record_installed(&conn, &session.id).unwrap();

        let session = update_session::find_by_id(&conn, &session.id).unwrap().unwrap();
        finalize(&conn, &session, "3.1.4").unwrap();
        let session = update_session::find_by_id(&conn, &session.id).unwrap().unwrap();
        finalize(&conn, &session, "3.1.4").unwrap();

        assert_eq!(
            settings::get(&conn, settings::APP_VERSION_KEY).unwrap().as_deref(),
            Some("3.1.4")
        );
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM settings WHERE key = ?1",
                [settings::APP_VERSION_KEY],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
