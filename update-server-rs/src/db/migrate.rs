use crate::db::connection::DbPool;
use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS update_sessions (
  id TEXT PRIMARY KEY,
  phase TEXT NOT NULL DEFAULT 'idle' CHECK(phase IN ('idle','backed_up','fetched','extracted','installed','finalized','rolled_back')),
  backup_archive_path TEXT NOT NULL DEFAULT '',
  package_archive_path TEXT NOT NULL DEFAULT '',
  extracted_package_path TEXT NOT NULL DEFAULT '',
  target_version TEXT NOT NULL DEFAULT '',
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_update_sessions_created_at ON update_sessions(created_at DESC);
"#;

/// Applies the schema to a single connection. Split out so tests can run
/// against an in-memory database.
pub fn apply_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Running database migration");
    let conn = pool.get()?;
    apply_schema(&conn)?;
    tracing::info!("[DB] Migration completed");
    Ok(())
}
