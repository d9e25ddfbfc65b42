use std::path::PathBuf;
use thiserror::Error;

/// Core domain errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid request: {reason}")]
    Validation { reason: String },

    #[error("A bulk operation is already running")]
    Busy,
}

impl CoreError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }
}

/// Failures of the subprocess runner itself.
///
/// A non-zero exit code is not one of these; it is reported inside
/// [`CommandResult`](crate::domain::CommandResult).
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to launch {program} in {cwd}: {source}")]
    Launch {
        program: String,
        cwd: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to collect output of {program}: {source}")]
    Output {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
