//! Per-invocation execution context.
//!
//! Every command invocation gets a fresh [`ExecutionContext`] carrying a
//! logger tagged with the plugin and command, the shared AI client, and a
//! config accessor over the host key/value store.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_ai::{GenerateRequest, SharedAiClient};
use tether_config::KeyValueStore;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Logger
// ─────────────────────────────────────────────────────────────────────────────

/// Log severity used by plugins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Logger handed to plugin commands.
///
/// Events go through `tracing` with the plugin, command, and invocation id
/// attached, so they land in the same console and file sinks as host logs.
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin: String,
    command: String,
    invocation: Uuid,
}

impl PluginLogger {
    pub fn new(plugin: impl Into<String>, command: impl Into<String>, invocation: Uuid) -> Self {
        Self {
            plugin: plugin.into(),
            command: command.into(),
            invocation,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(
                plugin = %self.plugin,
                command = %self.command,
                invocation = %self.invocation,
                "{message}"
            ),
            LogLevel::Info => tracing::info!(
                plugin = %self.plugin,
                command = %self.command,
                invocation = %self.invocation,
                "{message}"
            ),
            LogLevel::Warn => tracing::warn!(
                plugin = %self.plugin,
                command = %self.command,
                invocation = %self.invocation,
                "{message}"
            ),
            LogLevel::Error => tracing::error!(
                plugin = %self.plugin,
                command = %self.command,
                invocation = %self.invocation,
                "{message}"
            ),
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message.as_ref());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config accessor
// ─────────────────────────────────────────────────────────────────────────────

/// Read/write access to the host key/value store.
///
/// Backed by the same file for every plugin; nothing is cached, so a value
/// set in one invocation is visible to the next.
#[derive(Debug, Clone)]
pub struct ConfigAccessor {
    store: KeyValueStore,
}

impl ConfigAccessor {
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    pub async fn get(&self, key: &str) -> tether_config::Result<Option<Value>> {
        self.store.get(key).await
    }

    /// Get a value and deserialize it. Type mismatches read as `None`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> tether_config::Result<Option<T>> {
        Ok(self
            .get(key)
            .await?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    pub async fn set(&self, key: &str, value: impl Into<Value>) -> tether_config::Result<()> {
        self.store.set(key, value.into()).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a command can reach while it runs.
#[derive(Clone)]
pub struct ExecutionContext {
    pub logger: PluginLogger,
    pub ai: SharedAiClient,
    pub config: ConfigAccessor,
    invocation_id: Uuid,
}

impl ExecutionContext {
    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    /// Shorthand for a plain-prompt completion.
    pub async fn generate(&self, prompt: impl Into<String>) -> anyhow::Result<String> {
        Ok(self.ai.generate(GenerateRequest::new(prompt)).await?)
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("logger", &self.logger)
            .field("ai", &self.ai.name())
            .field("config", &self.config)
            .field("invocation_id", &self.invocation_id)
            .finish()
    }
}

/// Builds a fresh context for each invocation.
#[derive(Clone)]
pub struct ContextFactory {
    ai: SharedAiClient,
    store_path: PathBuf,
}

impl ContextFactory {
    pub fn new(ai: SharedAiClient, store_path: impl Into<PathBuf>) -> Self {
        Self {
            ai,
            store_path: store_path.into(),
        }
    }

    pub fn create(&self, plugin: &str, command: &str) -> ExecutionContext {
        let invocation_id = Uuid::new_v4();
        ExecutionContext {
            logger: PluginLogger::new(plugin, command, invocation_id),
            ai: self.ai.clone(),
            config: ConfigAccessor::new(KeyValueStore::new(&self.store_path)),
            invocation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tether_ai::MockClient;
    use tempfile::TempDir;

    fn factory(tmp: &TempDir) -> ContextFactory {
        ContextFactory::new(
            Arc::new(MockClient::with_text("ok")),
            tmp.path().join("store.json"),
        )
    }

    #[test]
    fn test_logger_tagged_with_plugin_and_command() {
        let tmp = TempDir::new().unwrap();
        let ctx = factory(&tmp).create("git", "git commit");

        assert_eq!(ctx.logger.plugin(), "git");
        assert_eq!(ctx.logger.command(), "git commit");
        ctx.logger.info("does not panic without a subscriber");
    }

    #[test]
    fn test_each_context_is_fresh() {
        let tmp = TempDir::new().unwrap();
        let factory = factory(&tmp);
        let a = factory.create("git", "git commit");
        let b = factory.create("git", "git commit");
        assert_ne!(a.invocation_id(), b.invocation_id());
    }

    #[tokio::test]
    async fn test_config_persists_across_contexts() {
        let tmp = TempDir::new().unwrap();
        let factory = factory(&tmp);

        let first = factory.create("git", "git config");
        first.config.set("remote", "origin").await.unwrap();

        let second = factory.create("other", "other run");
        assert_eq!(
            second.config.get("remote").await.unwrap(),
            Some(Value::from("origin"))
        );
        assert_eq!(
            second.config.get_as::<String>("remote").await.unwrap(),
            Some("origin".to_string())
        );
        assert_eq!(second.config.get_as::<u32>("remote").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_generate_uses_shared_client() {
        let tmp = TempDir::new().unwrap();
        let client = Arc::new(MockClient::with_text("summary"));
        let factory = ContextFactory::new(client.clone(), tmp.path().join("store.json"));

        let ctx = factory.create("git", "git summarize");
        assert_eq!(ctx.generate("summarize this").await.unwrap(), "summary");
        assert_eq!(client.requests()[0].prompt, "summarize this");
    }
}
