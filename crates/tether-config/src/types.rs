//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [plugins]
//! registry_file = "plugins.json"
//! describe_timeout_secs = 30
//! hook_timeout_secs = 10
//!
//! [ai]
//! provider = "stub"
//!
//! [dev]
//! watch_command = ["cargo", "build", "--release"]
//! debounce_ms = 500
//!
//! [logging]
//! file = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// Every section has defaults, so an absent or partial `config.toml` is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TetherConfig {
    /// Plugin loading settings.
    pub plugins: PluginsConfig,

    /// AI completion client settings.
    pub ai: AiConfig,

    /// `tether plugin dev` settings.
    pub dev: DevConfig,

    /// Log output settings.
    pub logging: LoggingConfig,
}

impl TetherConfig {
    /// Create a config with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugins
// ─────────────────────────────────────────────────────────────────────────────

/// Default file name of the persistent plugin registry.
pub const DEFAULT_REGISTRY_FILE: &str = "plugins.json";

/// Plugin loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginsConfig {
    /// Registry file, relative to the config directory unless absolute.
    pub registry_file: PathBuf,

    /// Timeout for `<plugin> describe` on executable plugins.
    pub describe_timeout_secs: u64,

    /// Upper bound for `on_load` / `on_unload` hooks. Unset means no bound.
    pub hook_timeout_secs: Option<u64>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            registry_file: PathBuf::from(DEFAULT_REGISTRY_FILE),
            describe_timeout_secs: 30,
            hook_timeout_secs: None,
        }
    }
}

impl PluginsConfig {
    /// Absolute path of the registry file for the given config directory.
    pub fn registry_path(&self, config_dir: &Path) -> PathBuf {
        if self.registry_file.is_absolute() {
            self.registry_file.clone()
        } else {
            config_dir.join(&self.registry_file)
        }
    }

    pub fn describe_timeout(&self) -> Duration {
        Duration::from_secs(self.describe_timeout_secs)
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout_secs.map(Duration::from_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AI
// ─────────────────────────────────────────────────────────────────────────────

/// AI completion client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    /// Provider name. Only `"stub"` ships with the host.
    pub provider: String,

    /// Model name passed through to the provider.
    pub model: Option<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "stub".to_string(),
            model: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dev mode
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for `tether plugin dev`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevConfig {
    /// Build-watch command spawned in the plugin directory when the plugin
    /// manifest does not declare its own `watch` command.
    pub watch_command: Vec<String>,

    /// Debounce window for file change events.
    pub debounce_ms: u64,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            watch_command: Vec::new(),
            debounce_ms: 500,
        }
    }
}

impl DevConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write JSON logs to `<config dir>/logs`.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { file: true }
    }
}
