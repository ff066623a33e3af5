//! Configuration system for the Tether plugin host.
//!
//! Provides:
//! - Config directory resolution (`TETHER_CONFIG_DIR` or the platform default)
//! - TOML host configuration (`config.toml`) with per-section defaults
//! - A JSON key/value document (`store.json`) backing plugin config accessors

pub mod discovery;
pub mod error;
pub mod store;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, save_config, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use store::{KeyValueStore, STORE_FILE};
pub use types::*;
