use crate::domain::repo::{CommandResult, RepoPath};
use crate::error::RunnerError;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Port for running git commands against a repository working copy
#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run `git <args>` with `repo` as working directory.
    ///
    /// Errors only when the process cannot be launched; a non-zero exit code
    /// is reported in the returned [`CommandResult`]. When `cancel` fires the
    /// child is killed and the call returns however the process ended.
    async fn run(
        &self,
        repo: &RepoPath,
        args: &[String],
        cancel: Option<CancellationToken>,
    ) -> Result<CommandResult, RunnerError>;
}

/// Convert string literals into an owned argument vector.
pub fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}
