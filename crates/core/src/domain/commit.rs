use serde::{Deserialize, Serialize};

/// Number of commits loaded for a git tree when the request names none.
pub const DEFAULT_TREE_COUNT: usize = 50;

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// One commit of a repository's history, as shown in the commit graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub author: String,
    pub relative_date: String,
    pub refs: Vec<String>,
}

/// `git log` arguments whose output [`parse_log`] understands.
pub fn log_args(count: usize) -> Vec<String> {
    vec![
        "log".to_string(),
        format!("--max-count={count}"),
        "--format=%H%x1f%h%x1f%s%x1f%an%x1f%ar%x1f%D%x1e".to_string(),
    ]
}

/// Parse the output of the command built by [`log_args`].
///
/// Records with a missing field are skipped.
pub fn parse_log(output: &str) -> Vec<CommitInfo> {
    output
        .split(RECORD_SEP)
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .filter_map(parse_record)
        .collect()
}

fn parse_record(record: &str) -> Option<CommitInfo> {
    let mut fields = record.split(FIELD_SEP);
    let hash = fields.next()?.to_string();
    let short_hash = fields.next()?.to_string();
    let message = fields.next()?.to_string();
    let author = fields.next()?.to_string();
    let relative_date = fields.next()?.to_string();
    let refs = fields
        .next()?
        .split(", ")
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();

    Some(CommitInfo {
        hash,
        short_hash,
        message,
        author,
        relative_date,
        refs,
    })
}
