//! Repository materializer: clone a repository once, read its source files into
//! a [`FileSnapshot`] and always remove the scratch checkout afterwards.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::MaterializeConfig;
use crate::contract::{FileSnapshot, RepositoryFetcher, SnapshotMeta};
use crate::error::RepositoryError;

const CLEANUP_ATTEMPTS: u32 = 5;
const CLEANUP_STEP: Duration = Duration::from_millis(400);

static GITHUB_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(https?://)?github\.com/[\w\-.]+/[\w\-.]+").expect("valid regex")
});

/// Turn a bare slug, an SSH reference or an HTTPS URL into a canonical
/// `https://.../owner/repo.git` clone URL. Already canonical input is
/// returned unchanged.
pub fn normalize_repo_url(reference: &str) -> Result<String, RepositoryError> {
    let trimmed = reference.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RepositoryError::InvalidReference(reference.to_string()));
    }

    if let Some(found) = GITHUB_URL.find(trimmed) {
        let mut url = found.as_str().to_string();
        if !url.starts_with("http") {
            url = format!("https://{url}");
        }
        return Ok(with_git_suffix(&url));
    }

    // git@host:owner/repo(.git)
    if let Some(rest) = trimmed.strip_prefix("git@") {
        if let Some((host, path)) = rest.split_once(':') {
            return Ok(with_git_suffix(&format!(
                "https://{}/{}",
                host,
                path.trim_matches('/')
            )));
        }
    }

    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        return Ok(with_git_suffix(trimmed));
    }

    Ok(with_git_suffix(&format!("https://github.com/{trimmed}")))
}

fn with_git_suffix(url: &str) -> String {
    let base = url.strip_suffix(".git").unwrap_or(url);
    format!("{base}.git")
}

/// Best-effort `owner/repo` extraction from any supported reference shape.
pub fn parse_repo_slug(reference: &str) -> String {
    let u = reference.trim();
    let rest = if let Some((_, after)) = u.split_once("github.com:") {
        Some(after)
    } else {
        u.split_once("github.com/").map(|(_, after)| after)
    };
    let Some(rest) = rest else {
        return u.to_string();
    };
    let rest = rest.trim_matches('/');
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let parts: Vec<&str> = rest.split('/').collect();
    if parts.len() >= 2 {
        let repo = parts[1].strip_suffix(".git").unwrap_or(parts[1]);
        format!("{}/{}", parts[0], repo)
    } else {
        u.to_string()
    }
}

/// The production fetcher: shells out to `git`.
#[derive(Debug, Clone)]
pub struct GitCli {
    clone_timeout: Duration,
    revision_timeout: Duration,
}

impl GitCli {
    pub fn new(config: &MaterializeConfig) -> Self {
        Self {
            clone_timeout: Duration::from_secs(config.clone_timeout_secs),
            revision_timeout: Duration::from_secs(config.revision_timeout_secs),
        }
    }
}

#[async_trait]
impl RepositoryFetcher for GitCli {
    async fn shallow_clone(&self, url: &str, dest: &Path) -> Result<(), RepositoryError> {
        // `git clone --depth 1 <url> <dest>`
        let child = Command::new("git")
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg(url)
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(error = ?e, "Failed to launch git process");
                return Err(RepositoryError::ToolUnavailable);
            }
            Err(e) => {
                error!(error = ?e, "Failed to launch git process");
                return Err(RepositoryError::Io(e));
            }
        };

        let output = match tokio::time::timeout(self.clone_timeout, child.wait_with_output()).await
        {
            Ok(result) => result?,
            Err(_) => {
                error!(repo_url = url, timeout_secs = self.clone_timeout.as_secs(), "Git clone timed out");
                return Err(RepositoryError::Timeout {
                    secs: self.clone_timeout.as_secs(),
                });
            }
        };

        if output.status.success() {
            info!(repo_url = url, path = %dest.display(), "Successfully cloned git repository");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            error!(repo_url = url, status = ?output.status, "Git exited with non-zero code");
            Err(RepositoryError::CloneFailed(message))
        }
    }

    async fn short_revision(&self, repo_dir: &Path) -> Option<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(repo_dir)
            .arg("rev-parse")
            .arg("--short")
            .arg("HEAD")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.revision_timeout, output).await {
            Ok(Ok(out)) if out.status.success() => {
                let rev = String::from_utf8_lossy(&out.stdout).trim().to_string();
                (!rev.is_empty()).then_some(rev)
            }
            Ok(Ok(out)) => {
                debug!(status = ?out.status, "git rev-parse failed; commit left empty");
                None
            }
            Ok(Err(e)) => {
                debug!(error = ?e, "git rev-parse could not run; commit left empty");
                None
            }
            Err(_) => {
                debug!("git rev-parse timed out; commit left empty");
                None
            }
        }
    }
}

/// Clones a repository into a scratch directory and reads it into a snapshot.
pub struct Materializer<F> {
    fetcher: F,
    config: MaterializeConfig,
}

impl<F: RepositoryFetcher> Materializer<F> {
    pub fn new(fetcher: F, config: MaterializeConfig) -> Self {
        Self { fetcher, config }
    }

    /// Materialize `reference` (URL or `owner/repo` slug).
    ///
    /// The scratch directory is deleted before this returns, whatever the outcome.
    pub async fn materialize(
        &self,
        reference: &str,
    ) -> Result<(FileSnapshot, SnapshotMeta), RepositoryError> {
        let url = normalize_repo_url(reference)?;
        let scratch = ScratchDir::new()?;
        let clone_dir = scratch.path().join("repo");
        info!(repo_url = %url, path = %clone_dir.display(), "Cloning repository");

        let outcome = self.materialize_into(reference, &url, &clone_dir).await;
        scratch.cleanup().await;
        outcome
    }

    async fn materialize_into(
        &self,
        reference: &str,
        url: &str,
        clone_dir: &Path,
    ) -> Result<(FileSnapshot, SnapshotMeta), RepositoryError> {
        self.fetcher.shallow_clone(url, clone_dir).await?;

        let files = collect_files(clone_dir, &self.config);
        if files.is_empty() {
            error!(repo_url = %url, "No eligible code files after filtering");
            return Err(RepositoryError::NoEligibleFiles);
        }
        info!(repo_url = %url, file_count = files.len(), "Successfully processed files");

        let commit = self.fetcher.short_revision(clone_dir).await;
        let meta = SnapshotMeta {
            repo_url: reference.to_string(),
            repo: parse_repo_slug(url),
            commit,
            generated_at: chrono::Utc::now().to_rfc3339(),
            file_count: files.len(),
        };
        Ok((files, meta))
    }
}

/// True when no component of `rel_path` is on the ignore list and the
/// extension is on the allow-list.
pub fn should_process(rel_path: &Path, config: &MaterializeConfig) -> bool {
    let ignored = rel_path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        config.ignore.iter().any(|i| i == name.as_ref())
    });
    if ignored {
        return false;
    }
    rel_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| config.extensions.iter().any(|allowed| allowed == ext))
        .unwrap_or(false)
}

/// Walk `root` in name order, stopping once `max_files` have been collected.
pub fn collect_files(root: &Path, config: &MaterializeConfig) -> FileSnapshot {
    let mut files = FileSnapshot::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !config
                    .ignore
                    .iter()
                    .any(|i| entry.file_name().to_string_lossy() == i.as_str())
        });

    for entry in walker {
        if files.len() >= config.max_files {
            debug!(max_files = config.max_files, "File cap reached, stopping walk");
            break;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel_path) = entry.path().strip_prefix(root) else {
            continue;
        };
        if !should_process(rel_path, config) {
            continue;
        }
        match entry.metadata() {
            Ok(meta) if meta.len() > config.max_file_bytes => {
                debug!(path = %rel_path.display(), size = meta.len(), "Skipping oversized file");
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path = %rel_path.display(), error = %e, "Skipping file without metadata");
                continue;
            }
        }
        let bytes = match std::fs::read(entry.path()) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %rel_path.display(), error = %e, "Skipping unreadable file");
                continue;
            }
        };
        let Ok(content) = String::from_utf8(bytes) else {
            debug!(path = %rel_path.display(), "Skipping non UTF-8 file");
            continue;
        };
        if content.trim().is_empty() {
            continue;
        }
        files.insert(to_slash_path(rel_path), content);
    }
    files
}

fn to_slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Scratch checkout area. Prefer [`ScratchDir::cleanup`]; dropping performs a
/// single best-effort removal for paths that never reach it.
pub struct ScratchDir {
    path: Option<PathBuf>,
}

impl ScratchDir {
    pub fn new() -> Result<Self, RepositoryError> {
        let dir = tempfile::Builder::new().prefix("repo-wiki-").tempdir()?;
        Ok(Self {
            path: Some(dir.keep()),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Remove the directory with bounded retries. Failures are logged, never returned.
    pub async fn cleanup(mut self) {
        if let Some(path) = self.path.take() {
            let joined = tokio::task::spawn_blocking(move || remove_with_retries(&path)).await;
            if let Err(e) = joined {
                warn!(error = %e, "Cleanup task did not complete");
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if path.exists() {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %e, "Could not clean up temp directory");
                }
            }
        }
    }
}

/// Delete `path`, clearing read-only bits and backing off between attempts.
pub fn remove_with_retries(path: &Path) {
    for attempt in 0..CLEANUP_ATTEMPTS {
        if !path.exists() {
            return;
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Removed temp directory");
                return;
            }
            Err(e) if attempt + 1 < CLEANUP_ATTEMPTS => {
                debug!(path = %path.display(), error = %e, attempt, "Temp directory removal failed, retrying");
                clear_readonly(path);
                std::thread::sleep(CLEANUP_STEP * (attempt + 1));
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not clean up temp directory");
            }
        }
    }
}

fn clear_readonly(path: &Path) {
    for entry in WalkDir::new(path).into_iter().filter_map(Result::ok) {
        if let Ok(meta) = entry.metadata() {
            let mut perms = meta.permissions();
            if perms.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                let _ = std::fs::set_permissions(entry.path(), perms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_slash_path_joins_components() {
        assert_eq!(to_slash_path(Path::new("a").join("b").join("c.py").as_path()), "a/b/c.py");
    }

    #[test]
    fn ignore_applies_to_any_component() {
        let conf = MaterializeConfig::default();
        assert!(!should_process(Path::new("node_modules/x/index.js"), &conf));
        assert!(!should_process(Path::new("src/build/gen.py"), &conf));
        assert!(should_process(Path::new("src/rebuild.py"), &conf));
        assert!(!should_process(Path::new("README.md"), &conf));
    }

    #[test]
    fn remove_with_retries_tolerates_missing_path() {
        remove_with_retries(Path::new("/definitely/not/here/repo-wiki"));
    }
}
