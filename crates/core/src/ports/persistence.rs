use crate::ports::discovery::DEFAULT_MAX_DEPTH;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration store interface
pub trait ConfigStore: Send + Sync {
    /// Load configuration from storage
    fn load(&self) -> Result<FleetConfig>;

    /// Save configuration to storage
    fn save(&self, config: &FleetConfig) -> Result<()>;
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    pub version: u32,
    pub roots: Vec<PathBuf>,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
    #[serde(default = "default_git_program")]
    pub git_program: String,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_max_concurrent() -> usize {
    5
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_watch_interval_ms() -> u64 {
    2000
}

fn default_git_program() -> String {
    "git".to_string()
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            version: 1,
            roots: vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))],
            max_depth: default_max_depth(),
            max_concurrent: default_max_concurrent(),
            poll_interval_ms: default_poll_interval_ms(),
            watch_interval_ms: default_watch_interval_ms(),
            git_program: default_git_program(),
        }
    }
}
