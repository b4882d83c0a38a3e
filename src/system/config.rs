// src/system/config.rs

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILENAME, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SHELL, SHELL_OVERRIDE_VAR,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse runner config: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Runner settings, read from `config.toml`. Every field is optional.
///
/// ```toml
/// default_shell = "bash"
/// poll_interval_ms = 25
/// inherit_external = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Shell used by `shell()` when no shell binary is given.
    pub default_shell: String,
    /// Poll interval of background process supervisors.
    pub poll_interval_ms: u64,
    /// Let unresolved `$NAME` references in per-command assignments fall back
    /// to the real OS environment instead of expanding to nothing.
    pub inherit_external: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_shell: DEFAULT_SHELL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            inherit_external: false,
        }
    }
}

impl RunnerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads an explicit config file, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_toml_str(&content)?.with_env_overrides())
    }

    /// Loads `<config dir>/runchain/config.toml` if present, defaults otherwise.
    pub fn discover() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.is_file() => {
                log::debug!("Loading runner config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default().with_env_overrides()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(shell) = env::var(SHELL_OVERRIDE_VAR) {
            if !shell.trim().is_empty() {
                self.default_shell = shell;
            }
        }
        self
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILENAME))
}
