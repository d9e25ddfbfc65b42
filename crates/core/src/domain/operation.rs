use super::repo::RepoPath;
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Bulk operations that can be applied across repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Fetch,
    Checkout,
    Push,
    Reset,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Fetch => "fetch",
            OperationKind::Checkout => "checkout",
            OperationKind::Push => "push",
            OperationKind::Reset => "reset",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    Soft,
    #[default]
    Mixed,
    Hard,
}

impl ResetMode {
    pub fn flag(&self) -> &'static str {
        match self {
            ResetMode::Soft => "--soft",
            ResetMode::Mixed => "--mixed",
            ResetMode::Hard => "--hard",
        }
    }
}

impl std::str::FromStr for ResetMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "soft" => Ok(ResetMode::Soft),
            "mixed" => Ok(ResetMode::Mixed),
            "hard" => Ok(ResetMode::Hard),
            other => Err(CoreError::validation(format!("Unknown reset mode: {other}"))),
        }
    }
}

/// Operation-specific options carried by a [`BulkOperationRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOptions {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub reset_mode: Option<ResetMode>,
    #[serde(default)]
    pub reset_count: Option<u32>,
}

/// A high-level request to run one operation over a set of repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationRequest {
    pub operation: OperationKind,
    pub repos: Vec<RepoPath>,
    #[serde(default)]
    pub options: BulkOptions,
}

impl BulkOperationRequest {
    pub fn new(operation: OperationKind, repos: Vec<RepoPath>) -> Self {
        Self {
            operation,
            repos,
            options: BulkOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BulkOptions) -> Self {
        self.options = options;
        self
    }

    /// Check the options and resolve defaults into a [`GitOperation`].
    ///
    /// Runs before any task is built, so a rejected request never reaches the
    /// queue.
    pub fn validate(&self) -> Result<GitOperation> {
        match self.operation {
            OperationKind::Fetch => Ok(GitOperation::Fetch),
            OperationKind::Push => Ok(GitOperation::Push),
            OperationKind::Checkout => {
                let branch = self
                    .options
                    .branch
                    .as_deref()
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| {
                        CoreError::validation("Branch name is required for checkout operation")
                    })?;
                Ok(GitOperation::Checkout {
                    branch: branch.to_string(),
                })
            }
            OperationKind::Reset => {
                let count = self.options.reset_count.unwrap_or(1);
                if count == 0 {
                    return Err(CoreError::validation("Reset count must be at least 1"));
                }
                Ok(GitOperation::Reset {
                    mode: self.options.reset_mode.unwrap_or_default(),
                    count,
                })
            }
        }
    }
}

/// A validated operation with its parameters resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitOperation {
    Fetch,
    Checkout { branch: String },
    Push,
    Reset { mode: ResetMode, count: u32 },
}

impl GitOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            GitOperation::Fetch => OperationKind::Fetch,
            GitOperation::Checkout { .. } => OperationKind::Checkout,
            GitOperation::Push => OperationKind::Push,
            GitOperation::Reset { .. } => OperationKind::Reset,
        }
    }

    /// Argument vector of the main git invocation for this operation.
    pub fn args(&self) -> Vec<String> {
        match self {
            GitOperation::Fetch => vec!["fetch".into(), "--all".into(), "--prune".into()],
            GitOperation::Checkout { branch } => vec!["checkout".into(), branch.clone()],
            GitOperation::Push => vec!["push".into()],
            GitOperation::Reset { mode, count } => vec![
                "reset".into(),
                mode.flag().into(),
                format!("HEAD~{count}"),
            ],
        }
    }

    /// Message used when the git invocation fails without any stderr.
    pub fn failure_fallback(&self) -> &'static str {
        match self {
            GitOperation::Fetch => "Fetch failed",
            GitOperation::Checkout { .. } => "Checkout failed",
            GitOperation::Push => "Push failed",
            GitOperation::Reset { .. } => "Reset failed",
        }
    }
}

/// Arguments of the clean-working-copy check that guards a push.
pub const PUSH_PRECONDITION_ARGS: &[&str] = &["status", "--porcelain"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Success | ProgressStatus::Error)
    }
}

/// Progress notification for one task of a bulk operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationProgress {
    pub repo: RepoPath,
    pub operation: OperationKind,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationProgress {
    pub fn pending(repo: RepoPath, operation: OperationKind) -> Self {
        Self::with_message(repo, operation, ProgressStatus::Pending, "Queued")
    }

    pub fn running(repo: RepoPath, operation: OperationKind) -> Self {
        Self::with_message(repo, operation, ProgressStatus::Running, "In progress")
    }

    pub fn success(repo: RepoPath, operation: OperationKind) -> Self {
        Self::with_message(repo, operation, ProgressStatus::Success, "Completed successfully")
    }

    pub fn error(repo: RepoPath, operation: OperationKind, error: impl Into<String>) -> Self {
        Self {
            repo,
            operation,
            status: ProgressStatus::Error,
            message: None,
            error: Some(error.into()),
        }
    }

    fn with_message(
        repo: RepoPath,
        operation: OperationKind,
        status: ProgressStatus,
        message: &str,
    ) -> Self {
        Self {
            repo,
            operation,
            status,
            message: Some(message.to_string()),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repos() -> Vec<RepoPath> {
        vec![RepoPath::new("/a"), RepoPath::new("/b")]
    }

    #[test]
    fn test_checkout_requires_branch() {
        let request = BulkOperationRequest::new(OperationKind::Checkout, repos());
        let err = request.validate().unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));

        let blank = request.clone().with_options(BulkOptions {
            branch: Some("   ".to_string()),
            ..Default::default()
        });
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_checkout_args() {
        let request = BulkOperationRequest::new(OperationKind::Checkout, repos()).with_options(
            BulkOptions {
                branch: Some("release/2.0".to_string()),
                ..Default::default()
            },
        );
        let op = request.validate().unwrap();
        assert_eq!(op.args(), vec!["checkout", "release/2.0"]);
        assert_eq!(op.kind(), OperationKind::Checkout);
    }

    #[test]
    fn test_reset_hard_three() {
        let request = BulkOperationRequest::new(OperationKind::Reset, repos()).with_options(
            BulkOptions {
                reset_mode: Some(ResetMode::Hard),
                reset_count: Some(3),
                ..Default::default()
            },
        );
        assert_eq!(request.validate().unwrap().args(), vec!["reset", "--hard", "HEAD~3"]);
    }

    #[test]
    fn test_reset_defaults_to_mixed_one() {
        let request = BulkOperationRequest::new(OperationKind::Reset, repos());
        assert_eq!(request.validate().unwrap().args(), vec!["reset", "--mixed", "HEAD~1"]);
    }

    #[test]
    fn test_reset_rejects_zero_count() {
        let request = BulkOperationRequest::new(OperationKind::Reset, repos()).with_options(
            BulkOptions {
                reset_count: Some(0),
                ..Default::default()
            },
        );
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_fetch_prunes() {
        let op = BulkOperationRequest::new(OperationKind::Fetch, repos()).validate().unwrap();
        assert_eq!(op.args(), vec!["fetch", "--all", "--prune"]);
    }

    #[test]
    fn test_reset_mode_from_str() {
        assert_eq!("soft".parse::<ResetMode>().unwrap(), ResetMode::Soft);
        assert!("medium".parse::<ResetMode>().is_err());
    }

    #[test]
    fn test_request_deserializes_from_camel_case() {
        let json = r#"{
            "operation": "reset",
            "repos": ["/src/api"],
            "options": { "resetMode": "soft", "resetCount": 2 }
        }"#;
        let request: BulkOperationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.operation, OperationKind::Reset);
        assert_eq!(request.options.reset_mode, Some(ResetMode::Soft));
        assert_eq!(request.validate().unwrap().args(), vec!["reset", "--soft", "HEAD~2"]);
    }

    #[test]
    fn test_progress_terminal_states() {
        let repo = RepoPath::new("/a");
        assert!(!OperationProgress::pending(repo.clone(), OperationKind::Push).status.is_terminal());
        assert!(OperationProgress::success(repo.clone(), OperationKind::Push).status.is_terminal());
        let failed = OperationProgress::error(repo, OperationKind::Push, "boom");
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert!(failed.status.is_terminal());
    }
}
