use crate::domain::repo::RepoPath;
use anyhow::Result;
use std::path::PathBuf;

/// Default depth limit below each root.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Request for repository discovery
#[derive(Clone, Debug)]
pub struct DiscoverReq {
    pub roots: Vec<PathBuf>,
    pub max_depth: usize,
}

impl DiscoverReq {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Port for repository discovery
pub trait DiscoveryPort: Send + Sync {
    /// Find repository roots below the requested roots.
    /// This is blocking - caller should run in spawn_blocking
    fn scan(&self, req: &DiscoverReq) -> Vec<RepoPath>;
}

/// Callback invoked when the repository set may have changed.
pub type ChangeCallback = Box<dyn Fn() + Send + Sync>;

/// Source of "repository set possibly changed" signals.
pub trait RepoWatcher: Send + Sync {
    /// Start watching; `on_change` fires whenever a repository marker was
    /// created or deleted. Watching ends when the returned guard is dropped.
    fn watch(&self, req: DiscoverReq, on_change: ChangeCallback) -> Result<WatchGuard>;
}

/// Keeps a watch alive; dropping it stops the watch.
pub struct WatchGuard {
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchGuard {
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchGuard")
            .field("active", &self.stop.is_some())
            .finish()
    }
}
