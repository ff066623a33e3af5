//! Config directory resolution and host config loading.
//!
//! Resolution order for the config directory:
//! 1. `TETHER_CONFIG_DIR` environment variable
//! 2. Platform default (`~/.config/tether` on Linux)

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, TetherConfig};

/// Default config filename within the config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for XDG directory resolution.
const APP_NAME: &str = "tether";

/// Environment variable to override the config directory.
///
/// Takes precedence over the platform default. Useful for testing and for
/// running isolated hosts side by side.
pub const CONFIG_DIR_ENV: &str = "TETHER_CONFIG_DIR";

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The effective configuration.
    pub config: TetherConfig,
    /// The config directory everything else is relative to.
    pub config_dir: PathBuf,
    /// The config file, if one was found and loaded.
    pub source: Option<PathBuf>,
}

impl LoadedConfig {
    /// Path of `config.toml`, whether or not it exists.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(USER_CONFIG_FILE)
    }

    /// Path of the persistent plugin registry.
    pub fn registry_path(&self) -> PathBuf {
        self.config.plugins.registry_path(&self.config_dir)
    }

    /// Path of the plugin key/value store.
    pub fn store_path(&self) -> PathBuf {
        self.config_dir.join(crate::STORE_FILE)
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }
}

/// Load the host configuration.
///
/// `config_dir` overrides both `TETHER_CONFIG_DIR` and the platform default.
/// A missing `config.toml` yields defaults; a malformed one is an error.
pub fn load_config(config_dir: Option<&Path>) -> Result<LoadedConfig> {
    let config_dir = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => xdg_config_dir().ok_or(ConfigError::NoConfigDir)?,
    };

    let path = config_dir.join(USER_CONFIG_FILE);
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(LoadedConfig {
            config: TetherConfig::default(),
            config_dir,
            source: None,
        });
    }

    let config = load_config_file(&path)?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(LoadedConfig {
        config,
        config_dir,
        source: Some(path),
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<TetherConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    TetherConfig::from_toml(&contents)
}

/// Save configuration to a file.
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &TetherConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Get the path of `config.toml` inside the config directory.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the config directory for tether.
///
/// Checks `TETHER_CONFIG_DIR` first, then falls back to the platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}
