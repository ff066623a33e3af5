//! Persistent plugin registry.
//!
//! A single JSON object mapping plugin name to the absolute directory the
//! plugin was loaded from:
//!
//! ```json
//! {
//!   "git-helpers": "/home/user/src/git-helpers",
//!   "hello": "/home/user/src/hello"
//! }
//! ```
//!
//! Reads never fail: a missing or malformed file is an empty registry. Writes
//! replace the whole file.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

/// Error type for registry writes.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The registry file or its directory could not be written.
    #[error("failed to write plugin registry '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The entries could not be serialized.
    #[error("failed to serialize plugin registry: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Entries
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered name → path mapping.
///
/// Backed by an order-preserving JSON object: first insertion fixes an
/// entry's position and re-inserting a name updates the path in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RegistryEntries {
    entries: Map<String, Value>,
}

impl RegistryEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update an entry. Returns the previous path, if any.
    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<String>) -> Option<String> {
        self.entries
            .insert(name.into(), Value::String(path.into()))
            .and_then(into_path)
    }

    /// Remove an entry, keeping the order of the rest.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.shift_remove(name).and_then(into_path)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(Value::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Iterate `(name, path)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(name, path)| Some((name.as_str(), path.as_str()?)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a registry document. `None` when the document is not an object
    /// of strings.
    fn parse(contents: &str) -> Option<Self> {
        let entries: Map<String, Value> = serde_json::from_str(contents).ok()?;
        if !entries.values().all(Value::is_string) {
            return None;
        }
        Some(Self { entries })
    }
}

fn into_path(value: Value) -> Option<String> {
    match value {
        Value::String(path) => Some(path),
        _ => None,
    }
}

impl<N: Into<String>, P: Into<String>> FromIterator<(N, P)> for RegistryEntries {
    fn from_iter<I: IntoIterator<Item = (N, P)>>(iter: I) -> Self {
        let mut entries = Self::new();
        for (name, path) in iter {
            entries.insert(name, path);
        }
        entries
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry file
// ─────────────────────────────────────────────────────────────────────────────

/// Handle on the registry file.
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    path: PathBuf,
}

impl PluginRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all entries.
    ///
    /// A missing file is empty. An unreadable or malformed file is also empty,
    /// with a warning.
    pub async fn read(&self) -> RegistryEntries {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no plugin registry yet");
                return RegistryEntries::new();
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to read plugin registry, treating as empty"
                );
                return RegistryEntries::new();
            }
        };

        match RegistryEntries::parse(&contents) {
            Some(entries) => entries,
            None => {
                tracing::warn!(
                    path = %self.path.display(),
                    "plugin registry is malformed, treating as empty"
                );
                RegistryEntries::new()
            }
        }
    }

    /// Replace the file with the given entries, creating parent directories.
    pub async fn write(&self, entries: &RegistryEntries) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RegistryError::Write {
                    path: parent.display().to_string(),
                    source: e,
                })?;
        }

        let contents = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| RegistryError::Write {
                path: self.path.display().to_string(),
                source: e,
            })
    }

    /// Record a plugin, keeping its position if already present.
    pub async fn record(&self, name: &str, path: &Path) -> Result<(), RegistryError> {
        let mut entries = self.read().await;
        entries.insert(name, path.display().to_string());
        self.write(&entries).await
    }

    /// Drop an entry. Returns whether it existed; the file is only written
    /// when something changed.
    pub async fn forget(&self, name: &str) -> Result<bool, RegistryError> {
        let mut entries = self.read().await;
        if entries.remove(name).is_none() {
            return Ok(false);
        }
        self.write(&entries).await?;
        Ok(true)
    }
}
