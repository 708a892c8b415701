use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failures raised by the update pipeline components.
#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    #[error("Archive error: {0}")]
    ArchiveIo(String),

    #[error("No usable release asset: {0}")]
    NoAssetFound(String),

    #[error("Invalid update package: {0}")]
    InvalidPackage(String),

    #[error("Local update file not found: {0}")]
    LocalFileNotFound(String),

    #[error("{failed} file(s) failed to install, {copied} copied (first failures: {first_failures:?})")]
    PartialInstall {
        copied: usize,
        failed: usize,
        first_failures: Vec<String>,
    },

    #[error("Backup creation failed: {0}")]
    BackupCreation(String),

    #[error("Backup archive not found: {0}")]
    BackupNotFound(String),

    #[error("Invalid phase transition: {0}")]
    InvalidPhase(String),

    #[error("Another update operation is already in progress")]
    UpdateInProgress,

    #[error("No update session found; run the backup phase first")]
    NoSession,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl UpdateError {
    /// Stable machine-readable code, one per taxonomy entry.
    pub fn code(&self) -> &'static str {
        match self {
            UpdateError::ArchiveIo(_) => "archive_io",
            UpdateError::NoAssetFound(_) => "no_asset_found",
            UpdateError::InvalidPackage(_) => "invalid_package",
            UpdateError::LocalFileNotFound(_) => "local_file_not_found",
            UpdateError::PartialInstall { .. } => "partial_install",
            UpdateError::BackupCreation(_) => "backup_creation",
            UpdateError::BackupNotFound(_) => "backup_not_found",
            UpdateError::InvalidPhase(_) => "invalid_phase",
            UpdateError::UpdateInProgress => "update_in_progress",
            UpdateError::NoSession => "no_session",
            UpdateError::Io(_) => "io",
            UpdateError::Http(_) => "http",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            UpdateError::InvalidPhase(_) | UpdateError::UpdateInProgress => StatusCode::CONFLICT,
            UpdateError::BackupNotFound(_)
            | UpdateError::LocalFileNotFound(_)
            | UpdateError::NoSession => StatusCode::NOT_FOUND,
            UpdateError::NoAssetFound(_) | UpdateError::InvalidPackage(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match &self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.clone()),
            AppError::Update(e) => (e.status(), e.code(), e.to_string()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".into(),
                )
            }
        };
        (
            status,
            Json(json!({ "success": false, "error": msg, "code": code })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(UpdateError::NoSession.code(), "no_session");
        assert_eq!(UpdateError::UpdateInProgress.code(), "update_in_progress");
        assert_eq!(
            UpdateError::BackupNotFound("x".into()).code(),
            "backup_not_found"
        );
        assert_eq!(
            UpdateError::PartialInstall {
                copied: 1,
                failed: 2,
                first_failures: vec![]
            }
            .code(),
            "partial_install"
        );
    }

    #[test]
    fn phase_errors_map_to_conflict() {
        assert_eq!(
            UpdateError::InvalidPhase("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(UpdateError::UpdateInProgress.status(), StatusCode::CONFLICT);
    }
}
