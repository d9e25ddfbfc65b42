use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use repofleet_core::app::{Command, ReadProjection};
use repofleet_core::domain::{
    BulkOperationRequest, BulkOptions, Event, LogLevel, OperationKind, ProgressStatus, RepoPath,
    RepoStatus, ResetMode,
};
use repofleet_core::ports::FleetConfig;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser, Debug, PartialEq)]
#[command(name = "repofleet", version)]
#[command(about = "Watch the status of many git repositories and run git operations across them")]
pub struct CliArgs {
    /// Directory to search for repositories; repeat for several (overrides config)
    #[arg(long = "root", value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Path to configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Status poll interval in milliseconds (overrides config)
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Operations allowed to run at once (overrides config)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub max_concurrent: Option<u16>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Print the status of every repository once
    Status,

    /// Keep printing status, picking up repositories as they appear
    Watch,

    /// Fetch all remotes, pruning deleted branches
    Fetch,

    /// Check out a branch
    Checkout { branch: String },

    /// Push the current branch; repositories with local changes are skipped
    Push,

    /// Move HEAD back by a number of commits
    Reset {
        #[arg(long, default_value = "mixed")]
        mode: ResetMode,

        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
    },
}

impl CliArgs {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut FleetConfig) {
        if !self.roots.is_empty() {
            config.roots = self.roots.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.poll_interval_ms = interval_ms;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent = usize::from(max_concurrent);
        }
    }
}

impl CliCommand {
    /// The bulk command to send for `repos`, or `None` for read-only
    /// subcommands.
    pub fn bulk_command(&self, repos: Vec<RepoPath>) -> Option<Command> {
        let command = match self {
            CliCommand::Status | CliCommand::Watch => return None,
            CliCommand::Fetch => {
                Command::BulkFetch(BulkOperationRequest::new(OperationKind::Fetch, repos))
            }
            CliCommand::Checkout { branch } => Command::BulkCheckout(
                BulkOperationRequest::new(OperationKind::Checkout, repos).with_options(
                    BulkOptions {
                        branch: Some(branch.clone()),
                        ..BulkOptions::default()
                    },
                ),
            ),
            CliCommand::Push => {
                Command::BulkPush(BulkOperationRequest::new(OperationKind::Push, repos))
            }
            CliCommand::Reset { mode, count } => Command::BulkReset(
                BulkOperationRequest::new(OperationKind::Reset, repos).with_options(
                    BulkOptions {
                        reset_mode: Some(*mode),
                        reset_count: Some(*count),
                        ..BulkOptions::default()
                    },
                ),
            ),
        };
        Some(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Discovering,
    Watching,
    Operating { started: bool },
    Finishing,
}

/// Drive the application service for one subcommand, printing to `out`.
///
/// Returns whether everything succeeded. `watch` only returns when the
/// event stream ends.
pub async fn run_frontend<W: Write>(
    command: &CliCommand,
    events: &mut mpsc::UnboundedReceiver<Event>,
    commands: &mpsc::UnboundedSender<Command>,
    out: &mut W,
) -> Result<bool> {
    commands
        .send(Command::FetchRepos)
        .context("Application service is not running")?;

    let mut projection = ReadProjection::new();
    let mut phase = Phase::Discovering;

    while let Some(event) = events.recv().await {
        projection.apply(&event);

        match (&event, phase) {
            (Event::RepoStatusUpdate { repos }, Phase::Discovering) => {
                let paths: Vec<RepoPath> = repos.iter().map(|s| s.path.clone()).collect();
                match command.bulk_command(paths) {
                    None => {
                        render_status_table(out, repos)?;
                        if *command == CliCommand::Status {
                            return Ok(true);
                        }
                        phase = Phase::Watching;
                    }
                    Some(_) if repos.is_empty() => {
                        writeln!(out, "No repositories found")?;
                        return Ok(true);
                    }
                    Some(bulk) => {
                        commands
                            .send(bulk)
                            .context("Application service is not running")?;
                        phase = Phase::Operating { started: false };
                    }
                }
            }

            (Event::RepoStatusUpdate { repos }, Phase::Watching) => {
                writeln!(out)?;
                render_status_table(out, repos)?;
            }

            (Event::RepoStatusUpdate { repos }, Phase::Finishing) => {
                render_status_table(out, repos)?;
                return Ok(projection.failed_repositories().is_empty());
            }

            (Event::OperationProgress(progress), Phase::Operating { .. }) => {
                phase = Phase::Operating { started: true };
                match progress.status {
                    ProgressStatus::Success => {
                        writeln!(out, "ok    {}", progress.repo.display_name())?;
                    }
                    ProgressStatus::Error => writeln!(
                        out,
                        "FAIL  {}: {}",
                        progress.repo.display_name(),
                        progress.error.as_deref().unwrap_or("unknown error")
                    )?,
                    ProgressStatus::Pending | ProgressStatus::Running => {}
                }
            }

            (Event::OperationComplete, Phase::Operating { .. }) => {
                let failed = projection.failed_repositories().len();
                writeln!(
                    out,
                    "{} of {} repositories succeeded",
                    projection.progress.len() - failed,
                    projection.progress.len()
                )?;
                phase = Phase::Finishing;
            }

            (Event::LogMessage { level, message }, current) if *level >= LogLevel::Error => {
                writeln!(out, "error: {message}")?;
                // A rejected request never produces progress
                if current == (Phase::Operating { started: false }) {
                    return Ok(false);
                }
            }

            _ => {}
        }
    }

    if phase == Phase::Watching {
        return Ok(true);
    }
    bail!("Application service stopped before the command finished")
}

/// Print one line per repository
pub fn render_status_table<W: Write>(out: &mut W, statuses: &[RepoStatus]) -> Result<()> {
    if statuses.is_empty() {
        writeln!(out, "No repositories found")?;
        return Ok(());
    }

    let name_width = statuses.iter().map(|s| s.name.len()).max().unwrap_or(0).max(4);
    let branch_width = statuses.iter().map(|s| s.branch.len()).max().unwrap_or(0).max(6);

    writeln!(
        out,
        "{:<name_width$}  {:<branch_width$}  {:<9}  SYNC",
        "REPO", "BRANCH", "STATE"
    )?;
    for status in statuses {
        let state = match (status.is_dirty, status.has_untracked) {
            (false, false) => "clean",
            (true, false) => "dirty",
            (false, true) => "untracked",
            (true, true) => "dirty+new",
        };
        let sync = if status.ahead == 0 && status.behind == 0 {
            "-".to_string()
        } else {
            format!("+{} -{}", status.ahead, status.behind)
        };
        writeln!(
            out,
            "{:<name_width$}  {:<branch_width$}  {:<9}  {}",
            status.name, status.branch, state, sync
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use repofleet_core::domain::OperationProgress;

    #[test]
    fn test_cli_parse_status() {
        let args = CliArgs::parse_from(["repofleet", "status"]);
        assert_eq!(args.command, CliCommand::Status);
        assert!(args.roots.is_empty());
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_cli_parse_roots_and_overrides() {
        let args = CliArgs::parse_from([
            "repofleet",
            "--root", "/src",
            "--root", "/work",
            "--config", "/custom/config.toml",
            "--interval-ms", "1500",
            "--max-concurrent", "3",
            "watch",
        ]);
        assert_eq!(args.roots, vec![PathBuf::from("/src"), PathBuf::from("/work")]);
        assert_eq!(args.config, Some(PathBuf::from("/custom/config.toml")));

        let mut config = FleetConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.roots, args.roots);
        assert_eq!(config.poll_interval_ms, 1500);
        assert_eq!(config.max_concurrent, 3);
    }

    #[test]
    fn test_cli_parse_reset_defaults() {
        let args = CliArgs::parse_from(["repofleet", "reset"]);
        assert_eq!(
            args.command,
            CliCommand::Reset {
                mode: ResetMode::Mixed,
                count: 1
            }
        );

        let args = CliArgs::parse_from(["repofleet", "reset", "--mode", "hard", "--count", "3"]);
        assert_eq!(
            args.command,
            CliCommand::Reset {
                mode: ResetMode::Hard,
                count: 3
            }
        );
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        assert!(CliArgs::try_parse_from(["repofleet", "reset", "--count", "0"]).is_err());
        assert!(CliArgs::try_parse_from(["repofleet", "reset", "--mode", "keep"]).is_err());
        assert!(CliArgs::try_parse_from(["repofleet", "checkout"]).is_err());
        assert!(CliArgs::try_parse_from(["repofleet", "--max-concurrent", "0", "fetch"]).is_err());
        assert!(CliArgs::try_parse_from(["repofleet"]).is_err());
    }

    #[test]
    fn test_bulk_command_mapping() {
        let repos = vec![RepoPath::new("/src/api")];
        assert_eq!(CliCommand::Status.bulk_command(repos.clone()), None);

        let Some(Command::BulkCheckout(request)) = (CliCommand::Checkout {
            branch: "develop".to_string(),
        })
        .bulk_command(repos.clone()) else {
            panic!("expected a checkout command");
        };
        assert_eq!(request.repos, repos);
        assert_eq!(request.options.branch.as_deref(), Some("develop"));
    }

    fn status(name: &str, dirty: bool, ahead: u32) -> RepoStatus {
        RepoStatus {
            path: RepoPath::new(format!("/src/{name}")),
            name: name.to_string(),
            branch: "main".to_string(),
            is_dirty: dirty,
            has_untracked: false,
            ahead,
            behind: 0,
            last_updated: 0,
        }
    }

    #[test]
    fn test_render_status_table() -> Result<()> {
        let mut out = Vec::new();
        render_status_table(&mut out, &[status("api", false, 0), status("frontend", true, 2)])?;

        let text = String::from_utf8(out)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "REPO      BRANCH  STATE      SYNC");
        assert_eq!(lines[1], "api       main    clean      -");
        assert_eq!(lines[2], "frontend  main    dirty      +2 -0");
        Ok(())
    }

    #[tokio::test]
    async fn test_status_prints_first_snapshot() -> Result<()> {
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (commands, mut sent) = mpsc::unbounded_channel();
        event_tx.send(Event::RepoStatusUpdate {
            repos: vec![status("api", false, 0)],
        })?;

        let mut out = Vec::new();
        let ok = run_frontend(&CliCommand::Status, &mut events, &commands, &mut out).await?;

        assert!(ok);
        assert_eq!(sent.try_recv()?, Command::FetchRepos);
        assert!(String::from_utf8(out)?.contains("api"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bulk_reports_failures() -> Result<()> {
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (commands, mut sent) = mpsc::unbounded_channel();
        let api = RepoPath::new("/src/api");
        let web = RepoPath::new("/src/web");

        for event in [
            Event::RepoStatusUpdate {
                repos: vec![status("api", false, 0), status("web", false, 0)],
            },
            Event::OperationProgress(OperationProgress::running(api.clone(), OperationKind::Fetch)),
            Event::OperationProgress(OperationProgress::success(api.clone(), OperationKind::Fetch)),
            Event::OperationProgress(OperationProgress::error(
                web.clone(),
                OperationKind::Fetch,
                "fatal: unable to access remote",
            )),
            Event::OperationComplete,
            Event::RepoStatusUpdate {
                repos: vec![status("api", false, 0), status("web", false, 0)],
            },
        ] {
            event_tx.send(event)?;
        }

        let mut out = Vec::new();
        let ok = run_frontend(&CliCommand::Fetch, &mut events, &commands, &mut out).await?;

        assert!(!ok);
        assert_eq!(sent.try_recv()?, Command::FetchRepos);
        let Command::BulkFetch(request) = sent.try_recv()? else {
            panic!("expected a fetch command");
        };
        assert_eq!(request.repos, vec![api, web]);

        let text = String::from_utf8(out)?;
        assert!(text.contains("ok    api"));
        assert!(text.contains("FAIL  web: fatal: unable to access remote"));
        assert!(text.contains("1 of 2 repositories succeeded"));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_request_fails() -> Result<()> {
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (commands, _sent) = mpsc::unbounded_channel();
        event_tx.send(Event::RepoStatusUpdate {
            repos: vec![status("api", false, 0)],
        })?;
        event_tx.send(Event::LogMessage {
            level: LogLevel::Error,
            message: "Cannot start fetch: A bulk operation is already running".to_string(),
        })?;

        let mut out = Vec::new();
        let ok = run_frontend(&CliCommand::Fetch, &mut events, &commands, &mut out).await?;

        assert!(!ok);
        assert!(String::from_utf8(out)?.contains("error: Cannot start fetch"));
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_end_during_operation_is_an_error() {
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (commands, _sent) = mpsc::unbounded_channel();
        event_tx
            .send(Event::RepoStatusUpdate {
                repos: vec![status("api", false, 0)],
            })
            .unwrap();
        drop(event_tx);

        let mut out = Vec::new();
        let result = run_frontend(&CliCommand::Push, &mut events, &commands, &mut out).await;
        assert!(result.is_err());
    }
}
