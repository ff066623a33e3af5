//! Plugin lifecycle: load, unload, startup restore.
//!
//! The loader owns the in-memory catalog of loaded plugins and keeps the
//! persistent registry in step with it. Load order is:
//!
//! 1. resolve the directory to an entry point and a factory
//! 2. instantiate and validate
//! 3. run `on_load`
//! 4. record the plugin in the registry
//! 5. insert it into the catalog
//!
//! Any failure stops the sequence, so a plugin is either fully loaded and
//! recorded or not present at all.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::guard::guarded;
use crate::manifest::resolve_entry;
use crate::registry::{PluginRegistry, RegistryError};
use crate::resolver::{EntryResolver, ModuleResolver};
use crate::types::Plugin;
use crate::validation::{ValidationError, validate};

/// Error type for [`PluginLoader::load`].
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The path does not point at a plugin directory.
    #[error("invalid plugin path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The directory's manifest could not be read.
    #[error("failed to read plugin manifest in '{path}': {reason}")]
    Manifest { path: String, reason: String },

    /// No factory exists for the entry point.
    #[error("failed to resolve plugin entry '{entry}': {reason}")]
    Resolve { entry: String, reason: String },

    /// The factory failed to build the plugin.
    #[error("failed to instantiate plugin from '{entry}': {reason}")]
    Instantiate { entry: String, reason: String },

    #[error("invalid plugin at '{path}': {source}")]
    Validation {
        path: String,
        #[source]
        source: ValidationError,
    },

    /// `on_load` failed, panicked, or timed out.
    #[error("plugin '{name}' failed to load: {reason}")]
    Hook { name: String, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Error type for [`PluginLoader::unload`].
#[derive(Debug, thiserror::Error)]
pub enum UnloadError {
    #[error("plugin '{0}' is not loaded")]
    NotFound(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A plugin in the catalog.
#[derive(Clone)]
pub struct LoadedPlugin {
    pub plugin: Arc<dyn Plugin>,
    /// Absolute directory the plugin was loaded from.
    pub source_path: PathBuf,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedPlugin {
    pub fn name(&self) -> &str {
        self.plugin.name()
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("plugin", &self.plugin)
            .field("source_path", &self.source_path)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// A saved plugin that failed to come back at startup.
#[derive(Debug, Clone)]
pub struct FailedPlugin {
    pub name: String,
    pub path: String,
    pub error: String,
}

/// Outcome of [`PluginLoader::load_saved_plugins`].
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub loaded: Vec<String>,
    pub failed: Vec<FailedPlugin>,
}

/// Owns the plugin catalog and the registry.
pub struct PluginLoader {
    catalog: Vec<LoadedPlugin>,
    registry: PluginRegistry,
    resolver: Box<dyn ModuleResolver>,
    hook_timeout: Option<Duration>,
}

impl PluginLoader {
    pub fn new(registry: PluginRegistry, resolver: EntryResolver) -> Self {
        Self::with_resolver(registry, Box::new(resolver))
    }

    pub fn with_resolver(registry: PluginRegistry, resolver: Box<dyn ModuleResolver>) -> Self {
        Self {
            catalog: Vec::new(),
            registry,
            resolver,
            hook_timeout: None,
        }
    }

    /// Bound `on_load` / `on_unload`. `None` waits indefinitely.
    pub fn with_hook_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Loaded plugins in load order.
    pub fn list(&self) -> &[LoadedPlugin] {
        &self.catalog
    }

    pub fn get(&self, name: &str) -> Option<&LoadedPlugin> {
        self.catalog.iter().find(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// Load the plugin in `source_path` and persist it.
    ///
    /// Loading a name that is already present replaces the catalog entry in
    /// place. The previous instance is not unloaded.
    pub async fn load(&mut self, source_path: impl AsRef<Path>) -> Result<&LoadedPlugin, LoadError> {
        let source_path = source_path.as_ref();
        match self.try_load(source_path).await {
            Ok(index) => Ok(&self.catalog[index]),
            Err(e) => {
                tracing::error!(path = %source_path.display(), error = %e, "failed to load plugin");
                Err(e)
            }
        }
    }

    async fn try_load(&mut self, source_path: &Path) -> Result<usize, LoadError> {
        let path = std::path::absolute(source_path).map_err(|e| LoadError::InvalidPath {
            path: source_path.display().to_string(),
            reason: e.to_string(),
        })?;
        if !path.is_dir() {
            return Err(LoadError::InvalidPath {
                path: path.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }

        let entry = resolve_entry(&path).map_err(|e| LoadError::Manifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let factory = self
            .resolver
            .resolve(&entry, &path)
            .map_err(|e| LoadError::Resolve {
                entry: entry.to_string(),
                reason: e.reason,
            })?;

        let plugin = guarded(factory.instantiate())
            .await
            .map_err(|e| LoadError::Instantiate {
                entry: entry.to_string(),
                reason: format!("{e:#}"),
            })?;

        validate(plugin.as_ref()).map_err(|e| LoadError::Validation {
            path: path.display().to_string(),
            source: e,
        })?;

        let name = plugin.name().to_string();
        self.run_hook(plugin.on_load())
            .await
            .map_err(|e| LoadError::Hook {
                name: name.clone(),
                reason: format!("{e:#}"),
            })?;

        // A failed registry write must leave the catalog unchanged.
        self.registry.record(&name, &path).await?;

        let loaded = LoadedPlugin {
            plugin,
            source_path: path,
            loaded_at: Utc::now(),
        };
        let index = match self.catalog.iter().position(|p| p.name() == name) {
            Some(index) => {
                self.catalog[index] = loaded;
                index
            }
            None => {
                self.catalog.push(loaded);
                self.catalog.len() - 1
            }
        };

        let loaded = &self.catalog[index];
        tracing::info!(
            name = %name,
            version = %loaded.plugin.version(),
            path = %loaded.source_path.display(),
            "plugin loaded"
        );
        Ok(index)
    }

    /// Unload a plugin and drop it from the registry.
    ///
    /// An `on_unload` failure is logged and does not stop the removal.
    pub async fn unload(&mut self, name: &str) -> Result<(), UnloadError> {
        let index = self
            .catalog
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| UnloadError::NotFound(name.to_string()))?;

        let plugin = self.catalog[index].plugin.clone();
        if let Err(e) = self.run_hook(plugin.on_unload()).await {
            tracing::warn!(name = %name, error = %format!("{e:#}"), "on_unload failed, removing anyway");
        }

        self.catalog.remove(index);
        self.registry.forget(name).await?;

        tracing::info!(name = %name, "plugin unloaded");
        Ok(())
    }

    /// Drop a registry entry without touching the catalog.
    ///
    /// Useful for entries whose directory no longer loads.
    pub async fn forget(&self, name: &str) -> Result<bool, RegistryError> {
        let removed = self.registry.forget(name).await?;
        if removed {
            tracing::info!(name = %name, "registry entry removed");
        }
        Ok(removed)
    }

    /// Load every plugin recorded in the registry, in registry order.
    ///
    /// Failures are logged as warnings and reported; they never stop the
    /// remaining entries.
    pub async fn load_saved_plugins(&mut self) -> StartupReport {
        let entries = self.registry.read().await;
        let mut report = StartupReport::default();

        for (name, path) in entries.iter() {
            match self.load(path).await {
                Ok(plugin) => report.loaded.push(plugin.name().to_string()),
                Err(e) => {
                    tracing::warn!(name = %name, path = %path, error = %e, "failed to restore saved plugin");
                    report.failed.push(FailedPlugin {
                        name: name.to_string(),
                        path: path.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "restored saved plugins"
        );
        report
    }

    async fn run_hook(
        &self,
        hook: impl Future<Output = anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        let hook = guarded(hook);
        match self.hook_timeout {
            Some(limit) => tokio::time::timeout(limit, hook).await.map_err(|_| {
                anyhow::anyhow!("hook timed out after {}ms", limit.as_millis())
            })?,
            None => hook.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_FILE;
    use crate::resolver::factory_fn;
    use crate::context::ExecutionContext;
    use crate::types::{CommandInput, CommandMap, PluginCommand};
    use async_trait::async_trait;
    use counter::Counter;
    use tempfile::TempDir;

    mod counter {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        #[derive(Debug, Clone, Default)]
        pub struct Counter(Arc<AtomicUsize>);

        impl Counter {
            pub fn bump(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            pub fn get(&self) -> usize {
                self.0.load(Ordering::SeqCst)
            }
        }
    }

    #[derive(Clone, Default)]
    struct TestPlugin {
        name: &'static str,
        version: &'static str,
        fail_load: bool,
        fail_unload: bool,
        slow_load: bool,
        loads: Counter,
        unloads: Counter,
    }

    impl TestPlugin {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                version: "1.0.0",
                ..Default::default()
            }
        }
    }

    struct Noop;

    #[async_trait]
    impl PluginCommand for Noop {
        fn description(&self) -> &str {
            "Does nothing"
        }
        async fn execute(&self, _input: CommandInput, _ctx: ExecutionContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> &str {
            self.version
        }
        fn description(&self) -> &str {
            "Test plugin"
        }
        fn commands(&self) -> CommandMap {
            let mut commands = CommandMap::new();
            commands.insert("noop".to_string(), Arc::new(Noop) as Arc<dyn PluginCommand>);
            commands
        }
        async fn on_load(&self) -> anyhow::Result<()> {
            self.loads.bump();
            if self.slow_load {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.fail_load {
                anyhow::bail!("cannot connect");
            }
            Ok(())
        }
        async fn on_unload(&self) -> anyhow::Result<()> {
            self.unloads.bump();
            if self.fail_unload {
                anyhow::bail!("cleanup failed");
            }
            Ok(())
        }
    }

    /// Create a plugin directory whose manifest points at `builtin:<id>`.
    fn plugin_dir(base: &Path, dir: &str, id: &str) -> PathBuf {
        let path = base.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(
            path.join(MANIFEST_FILE),
            format!(r#"{{"main": "builtin:{id}"}}"#),
        )
        .unwrap();
        path
    }

    fn loader(tmp: &TempDir, plugins: &[TestPlugin]) -> PluginLoader {
        let mut resolver = EntryResolver::new();
        for plugin in plugins {
            let plugin = plugin.clone();
            resolver.register(plugin.name, factory_fn(move || plugin.clone()));
        }
        PluginLoader::new(PluginRegistry::new(tmp.path().join("plugins.json")), resolver)
    }

    fn registry_json(tmp: &TempDir) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(tmp.path().join("plugins.json")).unwrap())
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_records_absolute_path() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "git", "git");
        let plugin = TestPlugin::named("git");
        let mut loader = loader(&tmp, &[plugin.clone()]);

        let loaded = loader.load(&dir).await.unwrap();
        assert_eq!(loaded.name(), "git");
        assert!(loaded.source_path.is_absolute());
        assert_eq!(plugin.loads.get(), 1);

        assert_eq!(
            registry_json(&tmp),
            serde_json::json!({"git": dir.display().to_string()})
        );
        assert!(loader.get("git").is_some());
        assert_eq!(loader.len(), 1);
    }

    #[tokio::test]
    async fn test_load_relative_path_is_absolutized() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "rel", "rel");
        let mut loader = loader(&tmp, &[TestPlugin::named("rel")]);

        // A path with a `.` component still refers to the same directory.
        let dotted = tmp.path().join(".").join("rel");
        let loaded = loader.load(&dotted).await.unwrap();
        assert!(loaded.source_path.is_absolute());
        assert!(loaded.source_path.ends_with("rel"));
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_load_twice_keeps_one_entry() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "git", "git");
        let plugin = TestPlugin::named("git");
        let mut loader = loader(&tmp, &[plugin.clone()]);

        loader.load(&dir).await.unwrap();
        loader.load(&dir).await.unwrap();

        assert_eq!(loader.len(), 1);
        assert_eq!(registry_json(&tmp).as_object().unwrap().len(), 1);
        // Reload does not unload the previous instance.
        assert_eq!(plugin.unloads.get(), 0);
        assert_eq!(plugin.loads.get(), 2);
    }

    #[tokio::test]
    async fn test_missing_version_rejected_before_hook() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "bad", "bad");
        let plugin = TestPlugin {
            version: "",
            ..TestPlugin::named("bad")
        };
        let mut loader = loader(&tmp, &[plugin.clone()]);

        let err = loader.load(&dir).await.unwrap_err();
        match err {
            LoadError::Validation { source, .. } => assert_eq!(source.field_name(), "version"),
            other => panic!("expected Validation, got {other:?}"),
        }
        assert_eq!(plugin.loads.get(), 0);
        assert!(loader.is_empty());
        assert!(!tmp.path().join("plugins.json").exists());
    }

    #[tokio::test]
    async fn test_failing_on_load_leaves_no_trace() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "flaky", "flaky");
        let plugin = TestPlugin {
            fail_load: true,
            ..TestPlugin::named("flaky")
        };
        let mut loader = loader(&tmp, &[plugin]);

        let err = loader.load(&dir).await.unwrap_err();
        assert!(matches!(err, LoadError::Hook { .. }));
        assert!(err.to_string().contains("cannot connect"));
        assert!(loader.get("flaky").is_none());
        assert!(!tmp.path().join("plugins.json").exists());
    }

    #[tokio::test]
    async fn test_hook_timeout() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "slow", "slow");
        let plugin = TestPlugin {
            slow_load: true,
            ..TestPlugin::named("slow")
        };
        let mut loader =
            loader(&tmp, &[plugin]).with_hook_timeout(Some(Duration::from_millis(50)));

        let err = loader.load(&dir).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(loader.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_entry() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("unbuilt");
        std::fs::create_dir_all(&dir).unwrap();
        let mut loader = loader(&tmp, &[]);

        let err = loader.load(&dir).await.unwrap_err();
        assert!(matches!(err, LoadError::Resolve { .. }));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let mut loader = loader(&tmp, &[]);

        let err = loader.load(tmp.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn test_registry_write_failure_leaves_catalog_untouched() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "git", "git");
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let resolver = EntryResolver::new().with_builtin("git", factory_fn(|| TestPlugin::named("git")));
        let mut loader =
            PluginLoader::new(PluginRegistry::new(blocker.join("plugins.json")), resolver);

        let err = loader.load(&dir).await.unwrap_err();
        assert!(matches!(err, LoadError::Registry(_)));
        assert!(loader.is_empty());
    }

    #[tokio::test]
    async fn test_unload_removes_everywhere() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "git", "git");
        let plugin = TestPlugin::named("git");
        let mut loader = loader(&tmp, &[plugin.clone()]);
        loader.load(&dir).await.unwrap();

        loader.unload("git").await.unwrap();
        assert!(loader.get("git").is_none());
        assert_eq!(plugin.unloads.get(), 1);
        assert_eq!(registry_json(&tmp), serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_failing_on_unload_still_removes() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "sticky", "sticky");
        let plugin = TestPlugin {
            fail_unload: true,
            ..TestPlugin::named("sticky")
        };
        let mut loader = loader(&tmp, &[plugin]);
        loader.load(&dir).await.unwrap();

        loader.unload("sticky").await.unwrap();
        assert!(loader.is_empty());
        assert_eq!(registry_json(&tmp), serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_unload_unknown_leaves_registry_alone() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "git", "git");
        let mut loader = loader(&tmp, &[TestPlugin::named("git")]);
        loader.load(&dir).await.unwrap();

        let before = std::fs::read(tmp.path().join("plugins.json")).unwrap();
        let err = loader.unload("ghost").await.unwrap_err();
        assert!(matches!(err, UnloadError::NotFound(name) if name == "ghost"));
        assert_eq!(std::fs::read(tmp.path().join("plugins.json")).unwrap(), before);
    }

    #[tokio::test]
    async fn test_list_in_load_order() {
        let tmp = TempDir::new().unwrap();
        let a = plugin_dir(tmp.path(), "zeta", "zeta");
        let b = plugin_dir(tmp.path(), "alpha", "alpha");
        let mut loader = loader(&tmp, &[TestPlugin::named("zeta"), TestPlugin::named("alpha")]);

        loader.load(&a).await.unwrap();
        loader.load(&b).await.unwrap();

        let names: Vec<&str> = loader.list().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_load_saved_plugins_tolerates_failures() {
        let tmp = TempDir::new().unwrap();
        let one = plugin_dir(tmp.path(), "one", "one");
        let two = plugin_dir(tmp.path(), "two", "two");
        let gone = tmp.path().join("gone");

        std::fs::write(
            tmp.path().join("plugins.json"),
            serde_json::json!({
                "one": one.display().to_string(),
                "gone": gone.display().to_string(),
                "two": two.display().to_string(),
            })
            .to_string(),
        )
        .unwrap();

        let mut loader = loader(&tmp, &[TestPlugin::named("one"), TestPlugin::named("two")]);
        let report = loader.load_saved_plugins().await;

        assert_eq!(report.loaded, vec!["one", "two"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "gone");

        let names: Vec<&str> = loader.list().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_load_saved_plugins_with_malformed_registry() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("plugins.json"), "[oops").unwrap();

        let mut loader = loader(&tmp, &[]);
        let report = loader.load_saved_plugins().await;
        assert!(report.loaded.is_empty());
        assert!(report.failed.is_empty());
        assert!(loader.is_empty());
    }

    #[tokio::test]
    async fn test_forget_keeps_catalog() {
        let tmp = TempDir::new().unwrap();
        let dir = plugin_dir(tmp.path(), "git", "git");
        let mut loader = loader(&tmp, &[TestPlugin::named("git")]);
        loader.load(&dir).await.unwrap();

        assert!(loader.forget("git").await.unwrap());
        assert!(!loader.forget("git").await.unwrap());
        assert!(loader.get("git").is_some());
        assert_eq!(registry_json(&tmp), serde_json::json!({}));
    }
}
