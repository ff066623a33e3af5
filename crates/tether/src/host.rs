//! Host state shared by the command handlers.

use std::sync::Arc;

use tether_ai::{SharedAiClient, StubClient};
use tether_config::{KeyValueStore, LoadedConfig};
use tether_plugin::{
    CommandNamespace, CommandTable, ContextFactory, EntryResolver, PluginLoader, PluginRegistry,
};

use crate::builtin;

/// The loaded configuration, the plugin catalog, and the context factory.
pub struct Host {
    pub config: LoadedConfig,
    pub loader: PluginLoader,
    contexts: ContextFactory,
}

impl Host {
    /// Build the host and load every plugin remembered in the registry.
    ///
    /// Plugins that fail to load are skipped with a warning.
    pub async fn start(config: LoadedConfig) -> Self {
        let ai = build_ai_client(&config);
        let resolver = builtin::register(
            EntryResolver::new().with_describe_timeout(config.config.plugins.describe_timeout()),
        );
        let mut loader = PluginLoader::new(PluginRegistry::new(config.registry_path()), resolver)
            .with_hook_timeout(config.config.plugins.hook_timeout());

        let report = loader.load_saved_plugins().await;
        tracing::debug!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "startup plugin load finished"
        );

        let contexts = ContextFactory::new(ai, config.store_path());
        Self {
            config,
            loader,
            contexts,
        }
    }

    /// Attach the commands of every loaded plugin.
    pub fn command_table(&self) -> CommandTable {
        CommandNamespace::new().build(self.loader.list())
    }

    pub fn contexts(&self) -> &ContextFactory {
        &self.contexts
    }

    /// The plugin key/value store.
    pub fn store(&self) -> KeyValueStore {
        KeyValueStore::new(self.config.store_path())
    }
}

/// A misconfigured provider falls back to the stub so host commands keep
/// working and the configuration can be fixed.
fn build_ai_client(config: &LoadedConfig) -> SharedAiClient {
    let ai = &config.config.ai;
    match tether_ai::build_client(&ai.provider, ai.model.as_deref()) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(provider = %ai.provider, error = %e, "falling back to the stub AI client");
            Arc::new(StubClient::new(ai.model.as_deref()))
        }
    }
}
