//! Entry point → plugin factory resolution.
//!
//! The loader never instantiates plugins itself. It asks a [`ModuleResolver`]
//! for a [`PluginFactory`] and lets the factory build the instance, so new
//! plugin kinds plug in without touching the lifecycle code.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::manifest::EntryPoint;
use crate::process::{DEFAULT_DESCRIBE_TIMEOUT, ProcessFactory};
use crate::types::Plugin;

/// Builds a plugin instance.
#[async_trait]
pub trait PluginFactory: Send + Sync {
    async fn instantiate(&self) -> anyhow::Result<Arc<dyn Plugin>>;
}

/// Factory backed by a constructor function.
pub struct FnFactory<F> {
    build: F,
}

impl<F> FnFactory<F>
where
    F: Fn() -> Arc<dyn Plugin> + Send + Sync,
{
    pub fn new(build: F) -> Self {
        Self { build }
    }
}

#[async_trait]
impl<F> PluginFactory for FnFactory<F>
where
    F: Fn() -> Arc<dyn Plugin> + Send + Sync,
{
    async fn instantiate(&self) -> anyhow::Result<Arc<dyn Plugin>> {
        Ok((self.build)())
    }
}

/// Wrap a plugin constructor as a shareable factory.
pub fn factory_fn<P, F>(build: F) -> Arc<dyn PluginFactory>
where
    P: Plugin + 'static,
    F: Fn() -> P + Send + Sync + 'static,
{
    Arc::new(FnFactory::new(move || Arc::new(build()) as Arc<dyn Plugin>))
}

/// Error returned when an entry point cannot be turned into a factory.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct ResolveError {
    pub reason: String,
}

impl ResolveError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Maps an entry point to a factory.
pub trait ModuleResolver: Send + Sync {
    fn resolve(
        &self,
        entry: &EntryPoint,
        plugin_dir: &Path,
    ) -> Result<Arc<dyn PluginFactory>, ResolveError>;
}

/// Default resolver: registered in-process factories plus executables.
pub struct EntryResolver {
    builtins: BTreeMap<String, Arc<dyn PluginFactory>>,
    describe_timeout: Duration,
}

impl Default for EntryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryResolver {
    pub fn new() -> Self {
        Self {
            builtins: BTreeMap::new(),
            describe_timeout: DEFAULT_DESCRIBE_TIMEOUT,
        }
    }

    /// Register an in-process plugin reachable as `builtin:<id>`.
    pub fn with_builtin(mut self, id: impl Into<String>, factory: Arc<dyn PluginFactory>) -> Self {
        self.register(id, factory);
        self
    }

    pub fn register(&mut self, id: impl Into<String>, factory: Arc<dyn PluginFactory>) {
        self.builtins.insert(id.into(), factory);
    }

    /// Timeout for `<plugin> describe` on executable plugins.
    pub fn with_describe_timeout(mut self, timeout: Duration) -> Self {
        self.describe_timeout = timeout;
        self
    }

    pub fn builtin_ids(&self) -> impl Iterator<Item = &str> {
        self.builtins.keys().map(String::as_str)
    }
}

impl ModuleResolver for EntryResolver {
    fn resolve(
        &self,
        entry: &EntryPoint,
        plugin_dir: &Path,
    ) -> Result<Arc<dyn PluginFactory>, ResolveError> {
        match entry {
            EntryPoint::Builtin(id) => self.builtins.get(id).cloned().ok_or_else(|| {
                ResolveError::new(format!("no builtin plugin registered as '{id}'"))
            }),
            EntryPoint::Executable(path) => {
                if !path.is_file() {
                    return Err(ResolveError::new(format!(
                        "entry file '{}' does not exist (build the plugin first?)",
                        path.display()
                    )));
                }
                Ok(Arc::new(ProcessFactory::new(
                    path.clone(),
                    plugin_dir.to_path_buf(),
                    self.describe_timeout,
                )))
            }
        }
    }
}
