//! The update pipeline's HTTP surface.
//!
//! Each pipeline phase is one POST action. Phases share state through the
//! persistent update session: `backup` opens a session and returns its id,
//! later phases resolve that id (or default to the most recent session)
//! and check the phase gate before touching the installation tree.

use crate::error::{AppError, UpdateError};
use crate::models::update_session::{self, UpdatePhase, UpdateSession};
use crate::models::settings;
use crate::services::backup::{self, BACKUP_EXCLUDES};
use crate::services::lock::PipelineLock;
use crate::services::{archive, finalizer, installer, resolver, rollback};
use crate::state::AppState;
use axum::extract::{Path as UrlPath, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(status))
        .route("/backup", post(backup_phase))
        .route("/download", post(download_phase))
        .route("/extract", post(extract_phase))
        .route("/install", post(install_phase))
        .route("/finalize", post(finalize_phase))
        .route("/rollback", post(rollback_phase))
        .route("/{action}", post(unknown_action))
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    download_url: String,
    version: String,
    #[serde(default)]
    session_id: Option<String>,
}

/// Body shared by the phases that only need the session (and, for
/// finalize, an optional version override).
#[derive(Debug, Default, Deserialize)]
struct PhaseRequest {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

fn resolve_session(
    conn: &Connection,
    session_id: Option<&str>,
) -> Result<UpdateSession, AppError> {
    let found = match session_id {
        Some(id) => update_session::find_by_id(conn, id)?,
        None => update_session::latest(conn)?,
    };
    found.ok_or_else(|| UpdateError::NoSession.into())
}

fn ensure_phase(
    session: &UpdateSession,
    allowed: &[UpdatePhase],
    action: &str,
) -> Result<(), UpdateError> {
    if allowed.contains(&session.phase) {
        return Ok(());
    }
    Err(UpdateError::InvalidPhase(format!(
        "Cannot run {} while the session is in phase {}",
        action,
        session.phase.as_str()
    )))
}

/// POST /api/update/backup - snapshot the installation, open a session.
async fn backup_phase(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let _guard = state.update_guard.clone().lock_owned().await;
    let db = state.db.clone();
    let config = state.config.clone();

    let (session, outcome) = tokio::task::spawn_blocking(
        move || -> Result<(UpdateSession, backup::BackupOutcome), AppError> {
            let _lock = PipelineLock::acquire(&config.lock_path)?;
            let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;

            let session = update_session::create(&conn)?;
            let outcome =
                backup::create_backup(&config.install_root, &config.backups_dir(), BACKUP_EXCLUDES)?;
            update_session::record_backup(
                &conn,
                &session.id,
                &outcome.archive_path.to_string_lossy(),
            )?;
            Ok((session, outcome))
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(json!({
        "success": true,
        "session_id": session.id,
        "backup_path": outcome.archive_path.to_string_lossy(),
        "files_count": outcome.files_count,
    })))
}

/// POST /api/update/download - resolve the package source and fetch it.
async fn download_phase(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DownloadRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.download_url.is_empty() {
        return Err(AppError::BadRequest("download_url is required".into()));
    }
    if body.version.is_empty() {
        return Err(AppError::BadRequest("version is required".into()));
    }

    let _guard = state.update_guard.clone().lock_owned().await;
    let _lock = PipelineLock::acquire(&state.config.lock_path)?;

    let db = state.db.clone();
    let session_id = body.session_id.clone();
    let session = tokio::task::spawn_blocking(move || -> Result<UpdateSession, AppError> {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        let session = resolve_session(&conn, session_id.as_deref())?;
        ensure_phase(
            &session,
            &[UpdatePhase::BackedUp, UpdatePhase::Fetched],
            "download",
        )?;
        Ok(session)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    let zip_path = resolver::resolve(&state.config, &body.download_url, &body.version).await?;
    let size = tokio::fs::metadata(&zip_path)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
        .len();

    let db = state.db.clone();
    let session_id = session.id.clone();
    let path_string = zip_path.to_string_lossy().to_string();
    let version = body.version.clone();
    tokio::task::spawn_blocking(move || -> Result<(), AppError> {
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        update_session::record_package(&conn, &session_id, &path_string, &version)?;
        Ok(())
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(json!({
        "success": true,
        "zip_path": zip_path.to_string_lossy(),
        "size": size,
    })))
}

/// POST /api/update/extract - unpack the fetched package into scratch space.
async fn extract_phase(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PhaseRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let _guard = state.update_guard.clone().lock_owned().await;
    let db = state.db.clone();
    let config = state.config.clone();

    let extract_path = tokio::task::spawn_blocking(move || -> Result<String, AppError> {
        let _lock = PipelineLock::acquire(&config.lock_path)?;
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        let session = resolve_session(&conn, body.session_id.as_deref())?;
        ensure_phase(
            &session,
            &[UpdatePhase::Fetched, UpdatePhase::Extracted],
            "extract",
        )?;

        let package = Path::new(&session.package_archive_path);
        if session.package_archive_path.is_empty() || !package.is_file() {
            return Err(UpdateError::InvalidPackage(
                "No fetched package archive for this session".into(),
            )
            .into());
        }

        let dest = config.temp_dir().join(format!("update_{}", session.id));
        // Each run rewrites the scratch directory from scratch, so a
        // retried extract never sees stale files.
        if dest.exists() {
            std::fs::remove_dir_all(&dest).map_err(|e| anyhow::anyhow!(e))?;
        }
        if let Err(e) = archive::extract(package, &dest) {
            let _ = std::fs::remove_dir_all(&dest);
            return Err(e.into());
        }

        let dest_string = dest.to_string_lossy().to_string();
        update_session::record_extracted(&conn, &session.id, &dest_string)?;
        Ok(dest_string)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(json!({
        "success": true,
        "extract_path": extract_path,
    })))
}

/// POST /api/update/install - overlay the package onto the live tree.
async fn install_phase(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PhaseRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let _guard = state.update_guard.clone().lock_owned().await;
    let db = state.db.clone();
    let config = state.config.clone();

    let files_copied = tokio::task::spawn_blocking(move || -> Result<usize, AppError> {
        let _lock = PipelineLock::acquire(&config.lock_path)?;
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        let session = resolve_session(&conn, body.session_id.as_deref())?;
        // Per-file idempotence makes a re-run of a completed install safe.
        ensure_phase(
            &session,
            &[UpdatePhase::Extracted, UpdatePhase::Installed],
            "install",
        )?;

        let extracted = Path::new(&session.extracted_package_path);
        if session.extracted_package_path.is_empty() || !extracted.is_dir() {
            return Err(UpdateError::InvalidPackage(
                "No extracted package directory for this session".into(),
            )
            .into());
        }

        let outcome = installer::install(extracted, &config.install_root)?;
        update_session::record_installed(&conn, &session.id)?;
        Ok(outcome.files_copied)
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(json!({
        "success": true,
        "files_copied": files_copied,
    })))
}

/// POST /api/update/finalize - record the version, drop transient files.
async fn finalize_phase(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PhaseRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let _guard = state.update_guard.clone().lock_owned().await;
    let db = state.db.clone();
    let config = state.config.clone();

    tokio::task::spawn_blocking(move || -> Result<(), AppError> {
        let _lock = PipelineLock::acquire(&config.lock_path)?;
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
        let session = resolve_session(&conn, body.session_id.as_deref())?;
        ensure_phase(
            &session,
            &[UpdatePhase::Installed, UpdatePhase::Finalized],
            "finalize",
        )?;

        let version = body
            .version
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| session.target_version.clone());
        finalizer::finalize(&conn, &session, &version)?;
        Ok(())
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(json!({ "success": true })))
}

/// POST /api/update/rollback - restore the live tree from the backup.
/// The body is optional; without one the most recent session that holds a
/// backup archive is restored.
async fn rollback_phase(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let session_id = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<PhaseRequest>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {e}")))?
            .session_id
    };

    let _guard = state.update_guard.clone().lock_owned().await;
    let db = state.db.clone();
    let config = state.config.clone();

    tokio::task::spawn_blocking(move || -> Result<(), AppError> {
        let _lock = PipelineLock::acquire(&config.lock_path)?;
        let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;

        let session = match session_id.as_deref() {
            Some(id) => update_session::find_by_id(&conn, id)?
                .ok_or(UpdateError::NoSession)?,
            None => update_session::latest_with_backup(&conn)?.ok_or_else(|| {
                UpdateError::BackupNotFound("No session with a backup archive exists".into())
            })?,
        };

        rollback::rollback(&session.backup_archive_path, &config.install_root)?;
        update_session::record_rolled_back(&conn, &session.id)?;
        Ok(())
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(json!({ "success": true })))
}

/// GET /api/update/status - current version and latest session.
async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let db = state.db.clone();
    let (version, session) = tokio::task::spawn_blocking(
        move || -> Result<(Option<String>, Option<UpdateSession>), AppError> {
            let conn = db.get().map_err(|e| anyhow::anyhow!(e))?;
            let version = settings::get(&conn, settings::APP_VERSION_KEY)?;
            let session = update_session::latest(&conn)?;
            Ok((version, session))
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(Json(json!({
        "success": true,
        "current_version": version,
        "session": session,
    })))
}

/// Catch-all for action names outside the pipeline.
async fn unknown_action(UrlPath(action): UrlPath<String>) -> AppError {
    AppError::BadRequest(format!("Unknown update action: {action}"))
}
