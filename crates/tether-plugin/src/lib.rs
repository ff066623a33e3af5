//! Plugin host for tether.
//!
//! Plugins contribute commands to the `tether` CLI. This crate owns their
//! whole lifecycle: resolving a plugin directory to an implementation,
//! validating and loading it, persisting it across runs, attaching its
//! commands to the CLI tree, and running them with a per-invocation context.
//!
//! # Plugin Structure
//!
//! ```text
//! my-plugin/
//!   plugin.json              # optional manifest: main, watch, ...
//!   target/release/my-plugin # conventional entry point without a manifest
//! ```
//!
//! An entry point is either an executable speaking the stdio protocol in
//! [`process`] or `builtin:<id>`, an in-process plugin registered with the
//! [`EntryResolver`].

pub mod context;
mod guard;
pub mod loader;
pub mod manifest;
pub mod namespace;
pub mod process;
pub mod registry;
pub mod resolver;
pub mod types;
pub mod validation;
pub mod watcher;

pub use context::{ConfigAccessor, ContextFactory, ExecutionContext, LogLevel, PluginLogger};
pub use loader::{FailedPlugin, LoadError, LoadedPlugin, PluginLoader, StartupReport, UnloadError};
pub use manifest::{EntryPoint, MANIFEST_FILE, ManifestError, PluginManifest, resolve_entry};
pub use namespace::{
    BoundCommand, CommandError, CommandNamespace, CommandTable, RESERVED_COMMANDS, SkipReason,
    SkippedCommand, full_path,
};
pub use process::{PLUGIN_DIR_ENV, PluginDescriptor, ProcessFactory, ProcessPlugin};
pub use registry::{PluginRegistry, RegistryEntries, RegistryError};
pub use resolver::{EntryResolver, FnFactory, ModuleResolver, PluginFactory, ResolveError, factory_fn};
pub use types::{CommandInput, CommandMap, Plugin, PluginCommand};
pub use validation::{ValidationError, ValidationResult, validate};
pub use watcher::{
    ChangeBatch, DevWatcher, WatchError, WatcherHandle, settle, spawn_watch_command, watch_command,
};
