//! Zip create/extract/list, used by every other pipeline component.

use crate::error::UpdateError;
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::path::{Component, Path};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Walks `source_root` and writes every regular file into a new archive at
/// `dest_archive`, stored under its forward-slash path relative to the
/// root. Paths whose first component matches one of `exclude_top_level`
/// are skipped; directories are not stored as separate entries.
///
/// Returns the number of files written.
pub fn create(
    source_root: &Path,
    dest_archive: &Path,
    exclude_top_level: &[&str],
) -> Result<usize, UpdateError> {
    let file = File::create(dest_archive).map_err(|e| {
        UpdateError::ArchiveIo(format!(
            "Cannot create archive {}: {}",
            dest_archive.display(),
            e
        ))
    })?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0usize;
    for entry in WalkDir::new(source_root) {
        let entry = entry.map_err(|e| {
            UpdateError::ArchiveIo(format!("Cannot walk {}: {}", source_root.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(source_root).unwrap_or(entry.path());
        if is_excluded(rel, exclude_top_level) {
            continue;
        }

        let name = zip_entry_name(rel);
        writer
            .start_file(name, options)
            .map_err(|e| UpdateError::ArchiveIo(format!("Cannot add {}: {}", rel.display(), e)))?;
        let mut source = File::open(entry.path()).map_err(|e| {
            UpdateError::ArchiveIo(format!("Cannot read {}: {}", entry.path().display(), e))
        })?;
        io::copy(&mut source, &mut writer)
            .map_err(|e| UpdateError::ArchiveIo(format!("Cannot write {}: {}", rel.display(), e)))?;
        count += 1;
    }

    writer.finish().map_err(|e| {
        UpdateError::ArchiveIo(format!(
            "Cannot finish archive {}: {}",
            dest_archive.display(),
            e
        ))
    })?;
    Ok(count)
}

/// Unpacks every entry of the archive into `dest_dir`, creating
/// intermediate directories as needed. Entry paths that would escape
/// `dest_dir` are rejected.
pub fn extract(archive_path: &Path, dest_dir: &Path) -> Result<(), UpdateError> {
    let file = File::open(archive_path).map_err(|e| {
        UpdateError::ArchiveIo(format!(
            "Cannot open archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| {
        UpdateError::ArchiveIo(format!(
            "Cannot read archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;

    std::fs::create_dir_all(dest_dir).map_err(|e| {
        UpdateError::ArchiveIo(format!("Cannot create {}: {}", dest_dir.display(), e))
    })?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| UpdateError::ArchiveIo(format!("Cannot read archive entry {i}: {e}")))?;
        let rel = entry.enclosed_name().ok_or_else(|| {
            UpdateError::ArchiveIo(format!("Unsafe path in archive: {}", entry.name()))
        })?;
        let out_path = dest_dir.join(rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| {
                UpdateError::ArchiveIo(format!("Cannot create {}: {}", out_path.display(), e))
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UpdateError::ArchiveIo(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }
        let mut out = File::create(&out_path).map_err(|e| {
            UpdateError::ArchiveIo(format!("Cannot create {}: {}", out_path.display(), e))
        })?;
        io::copy(&mut entry, &mut out).map_err(|e| {
            UpdateError::ArchiveIo(format!("Cannot extract {}: {}", out_path.display(), e))
        })?;
    }

    Ok(())
}

/// Entry names stored in the archive, in archive order.
pub fn list(archive_path: &Path) -> Result<Vec<String>, UpdateError> {
    let file = File::open(archive_path).map_err(|e| {
        UpdateError::ArchiveIo(format!(
            "Cannot open archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;
    let archive = ZipArchive::new(file).map_err(|e| {
        UpdateError::ArchiveIo(format!(
            "Cannot read archive {}: {}",
            archive_path.display(),
            e
        ))
    })?;
    Ok(archive.file_names().map(String::from).collect())
}

fn is_excluded(rel: &Path, exclude_top_level: &[&str]) -> bool {
    match rel.components().next() {
        Some(Component::Normal(first)) => exclude_top_level
            .iter()
            .any(|name| first == OsStr::new(name)),
        _ => false,
    }
}

fn zip_entry_name(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
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
    fn round_trip_preserves_tree() {
        let source = TempDir::new().unwrap();
        write_file(source.path(), "index.php", b"<?php echo 1;");
        write_file(source.path(), "lib/util.php", b"<?php function f() {}");
        write_file(source.path(), "assets/css/site.css", b"body {}");

        let dest = TempDir::new().unwrap();
        let archive_path = dest.path().join("snapshot.zip");
        let count = create(source.path(), &archive_path, &[]).unwrap();
        assert_eq!(count, 3);

        let out = TempDir::new().unwrap();
        extract(&archive_path, out.path()).unwrap();
        assert_eq!(
            fs::read(out.path().join("index.php")).unwrap(),
            b"<?php echo 1;"
        );
        assert_eq!(
            fs::read(out.path().join("lib/util.php")).unwrap(),
            b"<?php function f() {}"
        );
        assert_eq!(
            fs::read(out.path().join("assets/css/site.css")).unwrap(),
            b"body {}"
        );
    }

    #[test]
    fn excludes_match_top_level_components_only() {
        let source = TempDir::new().unwrap();
        write_file(source.path(), "index.php", b"keep");
        write_file(source.path(), "temp/scratch.txt", b"skip");
        // Same directory name nested deeper is not an operational dir.
        write_file(source.path(), "app/temp/data.txt", b"keep");

        let dest = TempDir::new().unwrap();
        let archive_path = dest.path().join("snapshot.zip");
        let count = create(source.path(), &archive_path, &["temp"]).unwrap();
        assert_eq!(count, 2);

        let mut names = list(&archive_path).unwrap();
        names.sort();
        assert_eq!(names, vec!["app/temp/data.txt", "index.php"]);
    }

    #[test]
    fn list_reports_stored_entries() {
        let source = TempDir::new().unwrap();
        write_file(source.path(), "a.txt", b"a");
        write_file(source.path(), "b/c.txt", b"c");

        let dest = TempDir::new().unwrap();
        let archive_path = dest.path().join("snapshot.zip");
        create(source.path(), &archive_path, &[]).unwrap();

        let mut names = list(&archive_path).unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b/c.txt"]);
    }

    #[test]
    fn extract_rejects_escaping_entries() {
        let dest = TempDir::new().unwrap();
        let archive_path = dest.path().join("evil.zip");

        let file = File::create(&archive_path).unwrap();
        let mut writer = ZipWriter::new(file);
        writer
            .start_file("../evil.txt", SimpleFileOptions::default())
            .unwrap();
        use std::io::Write;
        writer.write_all(b"escape").unwrap();
        writer.finish().unwrap();

        let out = TempDir::new().unwrap();
        let err = extract(&archive_path, out.path()).unwrap_err();
        assert!(matches!(err, UpdateError::ArchiveIo(_)));
        assert!(!out.path().join("../evil.txt").exists());
    }

    #[test]
    fn create_fails_for_unwritable_destination() {
        let source = TempDir::new().unwrap();
        let err = create(
            source.path(),
            Path::new("/nonexistent-dir/out.zip"),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, UpdateError::ArchiveIo(_)));
    }
}
