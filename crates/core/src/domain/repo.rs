use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Absolute path of a repository working copy.
///
/// This is the natural key for a repository everywhere: queueing, caching and
/// status all refer to repositories by path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoPath(PathBuf);

impl RepoPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Display name of the repository: its final path component.
    pub fn display_name(&self) -> String {
        self.0
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.0.to_string_lossy().to_string())
    }
}

impl From<PathBuf> for RepoPath {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&Path> for RepoPath {
    fn from(path: &Path) -> Self {
        Self(path.to_path_buf())
    }
}

impl AsRef<Path> for RepoPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for RepoPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Outcome of one subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Process exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr if there is any, otherwise the given fallback.
    pub fn failure_message(&self, fallback: &str) -> String {
        if self.stderr.is_empty() {
            fallback.to_string()
        } else {
            self.stderr.clone()
        }
    }
}

/// Point-in-time status of one repository, recomputed on every poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    pub path: RepoPath,
    pub name: String,
    pub branch: String,
    pub is_dirty: bool,
    pub has_untracked: bool,
    pub ahead: u32,
    pub behind: u32,
    /// Unix timestamp in milliseconds
    pub last_updated: i64,
}
