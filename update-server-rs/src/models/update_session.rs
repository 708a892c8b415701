//! Persistent update session records.
//!
//! Each update run is a row in `update_sessions`, keyed by an opaque id the
//! `backup` phase hands back to the caller. Later phases resolve the id (or
//! default to the most recent session) instead of relying on any
//! framework-global state, so phase ordering and job isolation are explicit.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

/// Pipeline phase of an update session. Forward transitions advance through
/// the listed order; `RolledBack` is reachable from any phase once a backup
/// archive exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    Idle,
    BackedUp,
    Fetched,
    Extracted,
    Installed,
    Finalized,
    RolledBack,
}

impl UpdatePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::BackedUp => "backed_up",
            UpdatePhase::Fetched => "fetched",
            UpdatePhase::Extracted => "extracted",
            UpdatePhase::Installed => "installed",
            UpdatePhase::Finalized => "finalized",
            UpdatePhase::RolledBack => "rolled_back",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(UpdatePhase::Idle),
            "backed_up" => Some(UpdatePhase::BackedUp),
            "fetched" => Some(UpdatePhase::Fetched),
            "extracted" => Some(UpdatePhase::Extracted),
            "installed" => Some(UpdatePhase::Installed),
            "finalized" => Some(UpdatePhase::Finalized),
            "rolled_back" => Some(UpdatePhase::RolledBack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateSession {
    pub id: String,
    pub phase: UpdatePhase,
    /// Empty until the corresponding phase succeeds.
    pub backup_archive_path: String,
    pub package_archive_path: String,
    pub extracted_package_path: String,
    pub target_version: String,
    pub created_at: String,
    pub updated_at: String,
}

const SELECT: &str = "SELECT id, phase, backup_archive_path, package_archive_path, \
                      extracted_package_path, target_version, created_at, updated_at \
                      FROM update_sessions";

fn from_row(row: &Row) -> rusqlite::Result<UpdateSession> {
    let phase: String = row.get(1)?;
    let phase = UpdatePhase::parse(&phase).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown update phase: {phase}").into(),
        )
    })?;
    Ok(UpdateSession {
        id: row.get(0)?,
        phase,
        backup_archive_path: row.get(2)?,
        package_archive_path: row.get(3)?,
        extracted_package_path: row.get(4)?,
        target_version: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub fn create(conn: &Connection) -> anyhow::Result<UpdateSession> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO update_sessions (id, phase) VALUES (?1, 'idle')",
        params![id],
    )?;
    find_by_id(conn, &id)?.ok_or_else(|| anyhow::anyhow!("session {id} missing after insert"))
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<UpdateSession>> {
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE id = ?1"))?;
    let mut rows = stmt.query_map(params![id], from_row)?;
    Ok(rows.next().transpose()?)
}

/// Most recently created session, regardless of phase.
pub fn latest(conn: &Connection) -> anyhow::Result<Option<UpdateSession>> {
    let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY rowid DESC LIMIT 1"))?;
    let mut rows = stmt.query_map([], from_row)?;
    Ok(rows.next().transpose()?)
}

/// Most recent session that produced a backup archive; rollback target.
pub fn latest_with_backup(conn: &Connection) -> anyhow::Result<Option<UpdateSession>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT} WHERE backup_archive_path != '' ORDER BY rowid DESC LIMIT 1"
    ))?;
    let mut rows = stmt.query_map([], from_row)?;
    Ok(rows.next().transpose()?)
}

pub fn record_backup(conn: &Connection, id: &str, archive_path: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE update_sessions SET phase = 'backed_up', backup_archive_path = ?2, \
         updated_at = datetime('now') WHERE id = ?1",
        params![id, archive_path],
    )?;
    Ok(())
}

pub fn record_package(
    conn: &Connection,
    id: &str,
    package_path: &str,
    target_version: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE update_sessions SET phase = 'fetched', package_archive_path = ?2, \
         target_version = ?3, updated_at = datetime('now') WHERE id = ?1",
        params![id, package_path, target_version],
    )?;
    Ok(())
}

pub fn record_extracted(conn: &Connection, id: &str, extracted_path: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE update_sessions SET phase = 'extracted', extracted_package_path = ?2, \
         updated_at = datetime('now') WHERE id = ?1",
        params![id, extracted_path],
    )?;
    Ok(())
}

pub fn record_installed(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE update_sessions SET phase = 'installed', updated_at = datetime('now') \
         WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

/// Finalize: drop the transient artifact paths, keep the backup path.
pub fn clear_transient(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE update_sessions SET phase = 'finalized', package_archive_path = '', \
         extracted_package_path = '', updated_at = datetime('now') WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub fn record_rolled_back(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE update_sessions SET phase = 'rolled_back', updated_at = datetime('now') \
         WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}
