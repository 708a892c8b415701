//! Overlays an extracted package onto the live installation tree.

use crate::error::UpdateError;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// How many failing paths a partial-install error carries.
const REPORTED_FAILURES: usize = 5;

#[derive(Debug)]
pub struct InstallOutcome {
    pub files_copied: usize,
    /// Relative paths that could not be written to the live tree.
    pub failures: Vec<String>,
}

/// Copies every file of the extracted package over `install_root`,
/// overwriting matches and leaving other live files in place. Copying is
/// best-effort per file: a failed file is recorded and the overlay
/// continues, so `files_copied == total - failures.len()` always holds.
/// A non-empty failure list is surfaced as `PartialInstall`.
pub fn install(extracted_dir: &Path, install_root: &Path) -> Result<InstallOutcome, UpdateError> {
    let package_root = locate_package_root(extracted_dir)?;
    let outcome = overlay_tree(&package_root, install_root);

    if outcome.failures.is_empty() {
        tracing::info!(
            "Installed {} files into {}",
            outcome.files_copied,
            install_root.display()
        );
        Ok(outcome)
    } else {
        Err(UpdateError::PartialInstall {
            copied: outcome.files_copied,
            failed: outcome.failures.len(),
            first_failures: outcome
                .failures
                .iter()
                .take(REPORTED_FAILURES)
                .cloned()
                .collect(),
        })
    }
}

/// Release archives usually wrap their content in a single top-level
/// folder (`name-1.2/...`). When the extracted tree holds exactly one
/// entry and it is a directory, that directory is the real package root.
pub fn locate_package_root(extracted_dir: &Path) -> Result<PathBuf, UpdateError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(extracted_dir)? {
        entries.push(entry?);
    }
    if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        return Ok(entries[0].path());
    }
    Ok(extracted_dir.to_path_buf())
}

fn overlay_tree(package_root: &Path, install_root: &Path) -> InstallOutcome {
    let mut files_copied = 0usize;
    let mut failures = Vec::new();

    for entry in WalkDir::new(package_root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let rel = e
                    .path()
                    .and_then(|p| p.strip_prefix(package_root).ok())
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| "<unreadable entry>".into());
                tracing::warn!("Cannot read package entry {}: {}", rel, e);
                failures.push(rel);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(package_root).unwrap_or(entry.path());
        let dest = install_root.join(rel);

        match overlay_file(entry.path(), &dest) {
            Ok(()) => files_copied += 1,
            Err(e) => {
                tracing::warn!("Cannot install {}: {}", rel.display(), e);
                failures.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    InstallOutcome {
        files_copied,
        failures,
    }
}

/// Copies one file into place via a temp sibling plus rename, so a reader
/// never observes a half-written file. An existing destination with
/// identical contents is left untouched, which makes re-running a
/// partially failed install safe.
fn overlay_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if is_identical(source, dest)? {
        return Ok(());
    }

    let staged = staging_path(dest);
    fs::copy(source, &staged)?;
    match fs::rename(&staged, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&staged);
            Err(e)
        }
    }
}

fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".update-tmp");
    dest.with_file_name(name)
}

fn is_identical(source: &Path, dest: &Path) -> std::io::Result<bool> {
    let dest_meta = match fs::metadata(dest) {
        Ok(m) if m.is_file() => m,
        _ => return Ok(false),
    };
    if fs::metadata(source)?.len() != dest_meta.len() {
        return Ok(false);
    }
    match fs::read(dest) {
        Ok(existing) => Ok(existing == fs::read(source)?),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn wrapper_folder_is_stripped() {
        let extracted = TempDir::new().unwrap();
        write_file(extracted.path(), "release-1.2/app/index.php", b"new");
        write_file(extracted.path(), "release-1.2/app/lib/util.php", b"new");

        let root = TempDir::new().unwrap();
        let outcome = install(extracted.path(), root.path()).unwrap();

        assert_eq!(outcome.files_copied, 2);
        assert!(root.path().join("app/index.php").is_file());
        assert!(root.path().join("app/lib/util.php").is_file());
        assert!(!root.path().join("release-1.2").exists());
    }

    #[test]
    fn unwrapped_package_installs_as_is() {
        let extracted = TempDir::new().unwrap();
        write_file(extracted.path(), "index.php", b"new");
        write_file(extracted.path(), "lib/util.php", b"new");

        let root = TempDir::new().unwrap();
        write_file(root.path(), "index.php", b"old");
        write_file(root.path(), "config.php", b"keep");

        let outcome = install(extracted.path(), root.path()).unwrap();
        assert_eq!(outcome.files_copied, 2);
        // Overwritten, created, and untouched files respectively.
        assert_eq!(fs::read(root.path().join("index.php")).unwrap(), b"new");
        assert_eq!(fs::read(root.path().join("lib/util.php")).unwrap(), b"new");
        assert_eq!(fs::read(root.path().join("config.php")).unwrap(), b"keep");
    }

    #[test]
    fn failures_are_counted_and_copying_continues() {
        let extracted = TempDir::new().unwrap();
        write_file(extracted.path(), "app/index.php", b"new");
        write_file(extracted.path(), "readme.txt", b"new");

        let root = TempDir::new().unwrap();
        // A file where the package expects a directory: app/index.php
        // cannot be written, readme.txt still can.
        fs::write(root.path().join("app"), b"not a dir").unwrap();

        let err = install(extracted.path(), root.path()).unwrap_err();
        match err {
            UpdateError::PartialInstall {
                copied,
                failed,
                first_failures,
            } => {
                assert_eq!(copied, 1);
                assert_eq!(failed, 1);
                assert_eq!(first_failures, vec!["app/index.php"]);
            }
            other => panic!("expected PartialInstall, got {other:?}"),
        }
        assert_eq!(fs::read(root.path().join("readme.txt")).unwrap(), b"new");
    }

    #[test]
    fn rerunning_install_is_idempotent() {
        let extracted = TempDir::new().unwrap();
        write_file(extracted.path(), "index.php", b"same");

        let root = TempDir::new().unwrap();
        let first = install(extracted.path(), root.path()).unwrap();
        let second = install(extracted.path(), root.path()).unwrap();

        assert_eq!(first.files_copied, 1);
        assert_eq!(second.files_copied, 1);
        assert_eq!(fs::read(root.path().join("index.php")).unwrap(), b"same");
    }

    #[test]
    fn no_staging_files_remain_after_install() {
        let extracted = TempDir::new().unwrap();
        write_file(extracted.path(), "a/b/c.txt", b"data");

        let root = TempDir::new().unwrap();
        install(extracted.path(), root.path()).unwrap();

        for entry in WalkDir::new(root.path()) {
            let entry = entry.unwrap();
            assert!(
                !entry.file_name().to_string_lossy().ends_with(".update-tmp"),
                "staging file left behind: {}",
                entry.path().display()
            );
        }
    }
}
