use repofleet_core::domain::RepoPath;
use repofleet_core::ports::{DiscoverReq, DiscoveryPort};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, info_span, warn, Span};
use walkdir::{DirEntry, WalkDir};

/// Name of the metadata entry marking a repository root.
pub const REPO_MARKER: &str = ".git";

/// Dependency, build and cache directories that never hold repositories
/// worth tracking.
pub const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    ".vscode",
    ".idea",
    "dist",
    "build",
    "out",
    "target",
    ".next",
    ".nuxt",
    "vendor",
    "__pycache__",
];

/// File system discovery adapter that implements DiscoveryPort
pub struct FsDiscoveryAdapter {
    /// Result of the most recent scan, replaced as a whole
    cache: RwLock<Arc<Vec<RepoPath>>>,
    span: Span,
}

impl FsDiscoveryAdapter {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(Arc::new(Vec::new())),
            span: info_span!("repo_discovery"),
        }
    }

    /// Log under the given span instead of the default one
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Repositories found by the most recent scan
    pub fn cached(&self) -> Arc<Vec<RepoPath>> {
        match self.cache.read() {
            Ok(cache) => Arc::clone(&cache),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn replace_cache(&self, repos: Vec<RepoPath>) {
        let repos = Arc::new(repos);
        match self.cache.write() {
            Ok(mut cache) => *cache = repos,
            Err(poisoned) => *poisoned.into_inner() = repos,
        }
    }
}

impl DiscoveryPort for FsDiscoveryAdapter {
    fn scan(&self, req: &DiscoverReq) -> Vec<RepoPath> {
        let _span = self.span.enter();
        info!("Starting repository discovery in {} roots", req.roots.len());

        let mut seen = HashSet::new();
        let repos: Vec<RepoPath> = req
            .roots
            .iter()
            .flat_map(|root| find_repos(root, req.max_depth))
            .filter(|path| seen.insert(path.clone()))
            .map(RepoPath::from)
            .collect();

        info!("Found {} repositories", repos.len());
        self.replace_cache(repos.clone());
        repos
    }
}

impl Default for FsDiscoveryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Find repository roots below `root`, at most `max_depth` levels down.
///
/// A directory holding a [`REPO_MARKER`] is recorded and not descended
/// into, so repositories nested inside another repository are not reported.
/// Unreadable subtrees are logged and contribute nothing.
pub fn find_repos(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    let mut repositories = Vec::new();
    let mut walker = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(is_candidate_dir);

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                warn!("Error scanning {}: {}", path, e);
                continue;
            }
        };

        if has_marker(entry.path()) {
            debug!("Repository found at {}", entry.path().display());
            repositories.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }

    repositories
}

/// Marker paths below `root` under the same walk rules as [`find_repos`].
pub fn marker_paths(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    find_repos(root, max_depth)
        .into_iter()
        .map(|repo| repo.join(REPO_MARKER))
        .collect()
}

fn is_candidate_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    // Roots are scanned whatever their name
    entry.depth() == 0 || !should_skip_directory(&entry.file_name().to_string_lossy())
}

pub fn should_skip_directory(name: &str) -> bool {
    SKIPPED_DIRS.contains(&name) || name.starts_with('.')
}

fn has_marker(dir: &Path) -> bool {
    // A .git file is a worktree or submodule pointer; dangling links do not count
    dir.join(REPO_MARKER).exists()
}
