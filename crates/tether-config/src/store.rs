//! JSON key/value document backing plugin config accessors.
//!
//! The document is a single JSON object, pretty-printed, stored next to the
//! host config. Every operation goes to disk: nothing is cached between calls,
//! so two handles on the same file never disagree.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::{ConfigError, Result};

/// Default file name of the key/value document.
pub const STORE_FILE: &str = "store.json";

/// Handle on a JSON key/value document.
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    path: PathBuf,
}

impl KeyValueStore {
    /// Create a handle; the file is created lazily on the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry.
    ///
    /// A missing file is an empty store. A file that is not a JSON object is
    /// an error, so a later `set` never clobbers data it could not read.
    pub async fn entries(&self) -> Result<Map<String, Value>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(ConfigError::ReadFile {
                    path: self.path.display().to_string(),
                    source: e,
                });
            }
        };

        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ConfigError::Store {
                path: self.path.display().to_string(),
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }),
            Err(e) => Err(ConfigError::Store {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Get a single value.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries().await?.get(key).cloned())
    }

    /// Set a value, overwriting any previous one.
    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries().await?;
        entries.insert(key.to_string(), value);
        self.write(&entries).await
    }

    /// Remove a value. Returns whether the key existed.
    pub async fn unset(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries().await?;
        if entries.shift_remove(key).is_none() {
            return Ok(false);
        }
        self.write(&entries).await?;
        Ok(true)
    }

    async fn write(&self, entries: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::WriteFile {
                    path: parent.display().to_string(),
                    source: e,
                })?;
        }

        let contents = serde_json::to_string_pretty(entries).map_err(|e| ConfigError::Store {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| ConfigError::WriteFile {
                path: self.path.display().to_string(),
                source: e,
            })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
