//! In-memory [`GitRunner`] for exercising the services without spawning git.

use async_trait::async_trait;
use repofleet_core::domain::{CommandResult, RepoPath};
use repofleet_core::error::RunnerError;
use repofleet_core::ports::GitRunner;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum Reply {
    Output {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    LaunchFailure,
}

#[derive(Debug, Clone)]
struct Rule {
    repo: Option<RepoPath>,
    args_prefix: Vec<String>,
    reply: Reply,
}

impl Rule {
    fn matches(&self, repo: &RepoPath, args: &[String]) -> bool {
        self.repo.as_ref().map_or(true, |r| r == repo) && args.starts_with(&self.args_prefix)
    }
}

/// Scripted runner: replies are chosen by repository and argument prefix,
/// later rules taking precedence. Unmatched invocations succeed with empty
/// output. Every invocation is recorded.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(RepoPath, Vec<String>)>>,
    delay: Option<Duration>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reply to `args_prefix` in any repository
    pub fn on(&self, args_prefix: &[&str], exit_code: i32, stdout: &str, stderr: &str) -> &Self {
        self.push_rule(None, args_prefix, output(exit_code, stdout, stderr))
    }

    /// Reply to `args_prefix` in one repository
    pub fn on_repo(
        &self,
        repo: &RepoPath,
        args_prefix: &[&str],
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> &Self {
        self.push_rule(Some(repo.clone()), args_prefix, output(exit_code, stdout, stderr))
    }

    /// Fail to launch any command in `repo`
    pub fn fail_launch(&self, repo: &RepoPath) -> &Self {
        self.push_rule(Some(repo.clone()), &[], Reply::LaunchFailure)
    }

    /// Every invocation so far, in call order
    pub fn calls(&self) -> Vec<(RepoPath, Vec<String>)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invocations whose arguments start with `args_prefix`
    pub fn calls_with(&self, args_prefix: &[&str]) -> Vec<(RepoPath, Vec<String>)> {
        self.calls()
            .into_iter()
            .filter(|(_, args)| {
                args.len() >= args_prefix.len()
                    && args.iter().zip(args_prefix).all(|(a, p)| a == p)
            })
            .collect()
    }

    fn push_rule(&self, repo: Option<RepoPath>, args_prefix: &[&str], reply: Reply) -> &Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Rule {
                repo,
                args_prefix: args_prefix.iter().map(|a| a.to_string()).collect(),
                reply,
            });
        self
    }

    fn reply_for(&self, repo: &RepoPath, args: &[String]) -> Reply {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|rule| rule.matches(repo, args))
            .map(|rule| rule.reply.clone())
            .unwrap_or_else(|| output(0, "", ""))
    }
}

fn output(exit_code: i32, stdout: &str, stderr: &str) -> Reply {
    Reply::Output {
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl GitRunner for ScriptedRunner {
    async fn run(
        &self,
        repo: &RepoPath,
        args: &[String],
        cancel: Option<CancellationToken>,
    ) -> Result<CommandResult, RunnerError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((repo.clone(), args.to_vec()));

        let reply = self.reply_for(repo, args);
        let started = tokio::time::Instant::now();

        if let Some(delay) = self.delay {
            let cancel = cancel.unwrap_or_else(CancellationToken::new);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Ok(CommandResult {
                        exit_code: -1,
                        stdout: String::new(),
                        stderr: String::new(),
                        duration: started.elapsed(),
                    });
                }
            }
        }

        match reply {
            Reply::Output {
                exit_code,
                stdout,
                stderr,
            } => Ok(CommandResult {
                exit_code,
                stdout,
                stderr,
                duration: started.elapsed(),
            }),
            Reply::LaunchFailure => Err(RunnerError::Launch {
                program: "git".to_string(),
                cwd: repo.as_path().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted launch failure"),
            }),
        }
    }
}
