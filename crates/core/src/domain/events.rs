use super::{
    commit::CommitInfo,
    operation::OperationProgress,
    repo::{RepoPath, RepoStatus},
};
use serde::{Deserialize, Serialize};

/// Severity of a forwarded log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by the core towards the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Event {
    /// A complete status snapshot replacing the previous one
    RepoStatusUpdate { repos: Vec<RepoStatus> },

    /// One task of a bulk operation changed state
    OperationProgress(OperationProgress),

    /// Every task of a bulk operation reached a terminal state
    OperationComplete,

    /// A diagnostic line
    LogMessage { level: LogLevel, message: String },

    /// Commit history was loaded for a repository
    GitTreeUpdate {
        repo: RepoPath,
        commits: Vec<CommitInfo>,
    },
}
