use anyhow::{Context, Result};
use directories::ProjectDirs;
use repofleet_core::ports::{ConfigStore, FleetConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// File-based configuration store that implements ConfigStore
pub struct FileConfigStore {
    config_path: PathBuf,
}

impl FileConfigStore {
    pub fn new() -> Result<Self> {
        let config_path = Self::get_default_config_path()?;
        Ok(Self { config_path })
    }

    pub fn with_path<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn get_default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "repofleet")
            .context("Failed to determine project directories")?;

        Ok(proj_dirs.config_dir().join("repofleet.toml"))
    }

    /// Defaults written on first load: the home directory is the only root
    fn default_config() -> FleetConfig {
        FleetConfig {
            roots: vec![dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))],
            ..FleetConfig::default()
        }
    }

    /// Create default config if it doesn't exist
    fn ensure_config_exists(&self) -> Result<()> {
        if !self.config_path.exists() {
            if let Some(parent) = self.config_path.parent() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
            self.save(&Self::default_config())?;
        }
        Ok(())
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<FleetConfig> {
        self.ensure_config_exists()?;

        let contents = fs::read_to_string(&self.config_path).with_context(|| {
            format!("Failed to read config file: {}", self.config_path.display())
        })?;

        let config: FleetConfig = toml::from_str(&contents).with_context(|| {
            format!("Failed to parse config file: {}", self.config_path.display())
        })?;

        Ok(config)
    }

    fn save(&self, config: &FleetConfig) -> Result<()> {
        let contents =
            toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;

        fs::write(&self.config_path, contents).with_context(|| {
            format!("Failed to write config file: {}", self.config_path.display())
        })?;

        Ok(())
    }
}
