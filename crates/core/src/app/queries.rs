use crate::domain::{CommitInfo, Event, OperationProgress, RepoPath, RepoStatus};
use std::collections::HashMap;

/// Read-only projection of the event stream for UI consumption
#[derive(Debug, Default)]
pub struct ReadProjection {
    /// Latest complete status snapshot, in poll order
    pub statuses: Vec<RepoStatus>,

    /// Most recent progress event per repository
    pub progress: HashMap<RepoPath, OperationProgress>,

    /// Latest loaded commit history per repository
    pub trees: HashMap<RepoPath, Vec<CommitInfo>>,

    /// Whether a bulk operation is in flight
    pub operation_running: bool,
}

impl ReadProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event to update the projection
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::RepoStatusUpdate { repos } => {
                self.statuses = repos.clone();
            }

            Event::OperationProgress(progress) => {
                if !progress.status.is_terminal() {
                    self.operation_running = true;
                }
                self.progress.insert(progress.repo.clone(), progress.clone());
            }

            Event::OperationComplete => {
                self.operation_running = false;
            }

            Event::GitTreeUpdate { repo, commits } => {
                self.trees.insert(repo.clone(), commits.clone());
            }

            Event::LogMessage { .. } => {
                // Log lines are not part of the projected state
            }
        }
    }

    pub fn status(&self, repo: &RepoPath) -> Option<&RepoStatus> {
        self.statuses.iter().find(|status| &status.path == repo)
    }

    /// Repositories whose last operation ended in an error
    pub fn failed_repositories(&self) -> Vec<&RepoPath> {
        let mut failed: Vec<_> = self
            .progress
            .values()
            .filter(|p| p.error.is_some())
            .map(|p| &p.repo)
            .collect();
        failed.sort();
        failed
    }

    /// Repositories with uncommitted or untracked changes
    pub fn dirty_repositories(&self) -> Vec<&RepoStatus> {
        self.statuses
            .iter()
            .filter(|s| s.is_dirty || s.has_untracked)
            .collect()
    }
}
