//! Plugin directory manifest and entry point resolution.
//!
//! A plugin directory may contain a `plugin.json` manifest:
//!
//! ```json
//! {
//!   "name": "git-helpers",
//!   "main": "target/release/git-helpers",
//!   "watch": ["cargo", "build", "--release"]
//! }
//! ```
//!
//! `main` is either an executable path relative to the plugin directory or
//! `builtin:<id>` for a plugin compiled into the host. Without a manifest (or
//! without `main`) the entry point is `target/release/<directory name>`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Manifest file name inside a plugin directory.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Prefix of `main` values naming an in-process plugin.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Error type for manifest reading.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("cannot derive an entry point from '{path}': directory has no name")]
    Unnamed { path: String },
}

/// Contents of `plugin.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Entry point, relative to the plugin directory or `builtin:<id>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    /// Build-watch command for `tether plugin dev`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<String>,
}

impl PluginManifest {
    /// Parse a manifest from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read the manifest of a plugin directory. `Ok(None)` when there is none.
    pub fn load(plugin_dir: &Path) -> Result<Option<Self>, ManifestError> {
        let path = plugin_dir.join(MANIFEST_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ManifestError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        Self::from_json(&contents)
            .map(Some)
            .map_err(|e| ManifestError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }
}

/// Where a plugin's implementation lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPoint {
    /// In-process plugin registered with the resolver under this id.
    Builtin(String),
    /// Executable speaking the stdio plugin protocol.
    Executable(PathBuf),
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin(id) => write!(f, "{BUILTIN_PREFIX}{id}"),
            Self::Executable(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Map a plugin directory to its entry point.
///
/// Deterministic: the same directory contents always give the same entry.
pub fn resolve_entry(plugin_dir: &Path) -> Result<EntryPoint, ManifestError> {
    let main = PluginManifest::load(plugin_dir)?.and_then(|m| m.main);

    if let Some(main) = main {
        let main = main.trim();
        if let Some(id) = main.strip_prefix(BUILTIN_PREFIX) {
            return Ok(EntryPoint::Builtin(id.trim().to_string()));
        }
        return Ok(EntryPoint::Executable(plugin_dir.join(main)));
    }

    conventional_entry(plugin_dir)
}

/// `target/release/<dir name>`, with the platform executable suffix.
pub fn conventional_entry(plugin_dir: &Path) -> Result<EntryPoint, ManifestError> {
    let dir_name = plugin_dir
        .file_name()
        .ok_or_else(|| ManifestError::Unnamed {
            path: plugin_dir.display().to_string(),
        })?
        .to_string_lossy();

    Ok(EntryPoint::Executable(
        plugin_dir
            .join("target")
            .join("release")
            .join(format!("{dir_name}{}", std::env::consts::EXE_SUFFIX)),
    ))
}
