use crate::domain::{commit::DEFAULT_TREE_COUNT, BulkOperationRequest, RepoPath};
use serde::{Deserialize, Serialize};

/// Requests the presentation layer sends to the application service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Command {
    /// Rediscover repositories and restart polling
    FetchRepos,

    /// Run one status poll cycle now
    RefreshStatus,

    BulkFetch(BulkOperationRequest),
    BulkCheckout(BulkOperationRequest),
    BulkPush(BulkOperationRequest),
    BulkReset(BulkOperationRequest),

    /// Load recent commit history for one repository
    FetchGitTree {
        repo: RepoPath,
        #[serde(default)]
        count: Option<usize>,
    },
}

impl Command {
    /// Commit count for a git tree request, falling back to the default.
    pub fn tree_count(count: Option<usize>) -> usize {
        count.filter(|c| *c > 0).unwrap_or(DEFAULT_TREE_COUNT)
    }
}
