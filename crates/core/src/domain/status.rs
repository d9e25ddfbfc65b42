//! Parser for `git status --porcelain -b` output.

use super::repo::{RepoPath, RepoStatus};

/// Arguments producing the output [`parse_porcelain_status`] understands.
pub const STATUS_ARGS: &[&str] = &["status", "--porcelain", "-b"];

/// Branch used when the output carries no `## ` header line.
pub const UNKNOWN_BRANCH: &str = "unknown";

const BRANCH_HEADER: &str = "## ";
const UNTRACKED_MARKER: &str = "??";

/// Status fields derived from porcelain output, before they are stamped with
/// a repository path and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PorcelainStatus {
    pub branch: String,
    pub ahead: u32,
    pub behind: u32,
    pub is_dirty: bool,
    pub has_untracked: bool,
}

impl PorcelainStatus {
    pub fn into_status(self, path: RepoPath, last_updated: i64) -> RepoStatus {
        RepoStatus {
            name: path.display_name(),
            path,
            branch: self.branch,
            is_dirty: self.is_dirty,
            has_untracked: self.has_untracked,
            ahead: self.ahead,
            behind: self.behind,
            last_updated,
        }
    }
}

impl Default for PorcelainStatus {
    fn default() -> Self {
        Self {
            branch: UNKNOWN_BRANCH.to_string(),
            ahead: 0,
            behind: 0,
            is_dirty: false,
            has_untracked: false,
        }
    }
}

/// Parse porcelain v1 status text with a branch header.
///
/// Entry lines are classified coarsely: `??` marks untracked files, anything
/// else (staged, unstaged, conflicted) marks the working copy dirty.
pub fn parse_porcelain_status(output: &str) -> PorcelainStatus {
    let mut status = PorcelainStatus::default();
    let mut lines = output.lines().filter(|line| !line.trim().is_empty()).peekable();

    if let Some(header) = lines.peek().and_then(|line| line.strip_prefix(BRANCH_HEADER)) {
        parse_branch_header(header, &mut status);
        lines.next();
    }

    for line in lines {
        if line.starts_with(UNTRACKED_MARKER) {
            status.has_untracked = true;
        } else {
            status.is_dirty = true;
        }
    }

    status
}

fn parse_branch_header(header: &str, status: &mut PorcelainStatus) {
    let local = header.split("...").next().unwrap_or_default();
    if let Some(branch) = local.split(' ').next().filter(|b| !b.is_empty()) {
        status.branch = branch.to_string();
    }

    if let Some(ahead) = count_after(header, "ahead ") {
        status.ahead = ahead;
    }
    if let Some(behind) = count_after(header, "behind ") {
        status.behind = behind;
    }
}

/// The number directly following `token`, e.g. `3` in `[ahead 3]`.
/// Occurrences not followed by a digit (a branch named `ahead`) are skipped.
fn count_after(text: &str, token: &str) -> Option<u32> {
    text.match_indices(token).find_map(|(idx, _)| {
        let rest = &text[idx + token.len()..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        rest[..end].parse().ok()
    })
}
