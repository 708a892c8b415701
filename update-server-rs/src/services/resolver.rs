//! Turns a user-supplied update reference into a local package archive.
//!
//! A reference is either a GitHub releases page, a path on the local
//! filesystem, or a plain download URL; all three end as a zip file in the
//! updates directory, validated for a minimum plausible size.

use crate::config::AppConfig;
use crate::error::UpdateError;
use futures_util::StreamExt;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Packages smaller than this are truncated downloads or garbage.
pub const MIN_PACKAGE_BYTES: u64 = 1000;

const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const USER_AGENT: &str = concat!("update-server/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// Releases page of a GitHub repository, optionally pinned to a tag.
    GithubRelease {
        owner: String,
        repo: String,
        tag: Option<String>,
    },
    /// Absolute or relative path on the local filesystem.
    LocalFile(String),
    /// Any other URL, fetched directly.
    DirectUrl(String),
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
    size: u64,
}

/// Fetches the package `reference` points at into the updates directory
/// and returns the local archive path. The resulting file is guaranteed to
/// exist and hold at least `MIN_PACKAGE_BYTES`.
pub async fn resolve(
    config: &AppConfig,
    reference: &str,
    target_version: &str,
) -> Result<PathBuf, UpdateError> {
    let updates_dir = config.updates_dir();
    std::fs::create_dir_all(&updates_dir)?;
    let dest = updates_dir.join(package_file_name(target_version));

    match classify(reference) {
        PackageSource::GithubRelease { owner, repo, tag } => {
            let tag = tag.unwrap_or_else(|| target_version.to_string());
            let asset_url = find_release_asset(&owner, &repo, &tag).await?;
            download_to(&asset_url, &dest).await?;
        }
        PackageSource::LocalFile(path) => {
            let source = resolve_local_file(&config.install_root, &path)?;
            std::fs::copy(&source, &dest)?;
        }
        PackageSource::DirectUrl(url) => {
            download_to(&url, &dest).await?;
        }
    }

    validate_package(&dest)?;
    Ok(dest)
}

/// Classifies a reference, in order: GitHub releases URL, local path,
/// direct URL.
pub fn classify(reference: &str) -> PackageSource {
    if let Some(source) = parse_github_releases_url(reference) {
        return source;
    }
    if reference.starts_with('/') || reference.starts_with("./") || reference.starts_with("../") {
        return PackageSource::LocalFile(reference.to_string());
    }
    PackageSource::DirectUrl(reference.to_string())
}

/// Matches `https://github.com/{owner}/{repo}/releases` and
/// `.../releases/tag/{tag}`. Asset download URLs (`.../releases/download/...`)
/// are plain file URLs and deliberately do not match.
fn parse_github_releases_url(reference: &str) -> Option<PackageSource> {
    let rest = reference
        .strip_prefix("https://github.com/")
        .or_else(|| reference.strip_prefix("http://github.com/"))?;
    let mut segments = rest.trim_end_matches('/').split('/');

    let owner = segments.next().filter(|s| !s.is_empty())?.to_string();
    let repo = segments.next().filter(|s| !s.is_empty())?.to_string();
    if segments.next()? != "releases" {
        return None;
    }
    let tag = match segments.next() {
        None => None,
        Some("tag") => Some(segments.next().filter(|s| !s.is_empty())?.to_string()),
        Some(_) => return None,
    };
    if segments.next().is_some() {
        return None;
    }
    Some(PackageSource::GithubRelease { owner, repo, tag })
}

/// Release-metadata endpoint for a tag; the sentinel `latest` selects the
/// latest-release endpoint instead of a tagged one.
pub fn release_api_url(owner: &str, repo: &str, tag: &str) -> String {
    if tag == "latest" {
        format!("https://api.github.com/repos/{owner}/{repo}/releases/latest")
    } else {
        format!("https://api.github.com/repos/{owner}/{repo}/releases/tags/{tag}")
    }
}

async fn find_release_asset(owner: &str, repo: &str, tag: &str) -> Result<String, UpdateError> {
    let url = release_api_url(owner, repo, tag);
    let client = reqwest::Client::builder().timeout(METADATA_TIMEOUT).build()?;
    let response = client
        .get(&url)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github.v3+json")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(UpdateError::NoAssetFound(format!(
            "GitHub API returned {} for {owner}/{repo} tag {tag}",
            response.status()
        )));
    }

    let release: GithubRelease = response.json().await.map_err(|e| {
        UpdateError::NoAssetFound(format!("Cannot parse release metadata: {e}"))
    })?;
    let asset = release
        .assets
        .iter()
        .find(|a| a.name.ends_with(".zip"))
        .ok_or_else(|| {
            UpdateError::NoAssetFound(format!(
                "Release {} of {owner}/{repo} has no zip asset",
                release.tag_name
            ))
        })?;

    tracing::info!(
        "Selected asset {} ({} bytes) from release {}",
        asset.name,
        asset.size,
        release.tag_name
    );
    Ok(asset.browser_download_url.clone())
}

/// Streams a URL to `dest`. Redirects are followed and certificates are
/// verified (reqwest defaults). A failed transfer removes the partial file.
async fn download_to(url: &str, dest: &Path) -> Result<(), UpdateError> {
    let result = stream_to_file(url, dest).await;
    if result.is_err() {
        let _ = std::fs::remove_file(dest);
    }
    result
}

async fn stream_to_file(url: &str, dest: &Path) -> Result<(), UpdateError> {
    tracing::info!("Downloading {}", url);
    let client = reqwest::Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?;
    let response = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(UpdateError::InvalidPackage(format!(
            "Download failed: HTTP {} from {url}",
            response.status()
        )));
    }

    let mut file = std::fs::File::create(dest)?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?)?;
    }
    Ok(())
}

/// Tries the reference literally, then relative to the install root.
fn resolve_local_file(install_root: &Path, reference: &str) -> Result<PathBuf, UpdateError> {
    let literal = PathBuf::from(reference);
    if literal.is_file() {
        return Ok(literal);
    }
    let rooted = install_root.join(reference.trim_start_matches('/'));
    if rooted.is_file() {
        return Ok(rooted);
    }
    Err(UpdateError::LocalFileNotFound(reference.to_string()))
}

fn validate_package(dest: &Path) -> Result<(), UpdateError> {
    let size = std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
    if size < MIN_PACKAGE_BYTES {
        let _ = std::fs::remove_file(dest);
        return Err(UpdateError::InvalidPackage(format!(
            "Package is {size} bytes, below the {MIN_PACKAGE_BYTES} byte minimum"
        )));
    }
    Ok(())
}

fn package_file_name(version: &str) -> String {
    // Version strings come straight from the request; keep only
    // filename-safe characters.
    let safe: String = version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("update_{safe}.zip")
}
