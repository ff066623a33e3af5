//! Plugin and command contracts.
//!
//! A plugin is anything implementing [`Plugin`]: in-process plugins compiled
//! into the host and executable plugins driven over stdio both end up behind
//! the same trait object.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;

/// Commands contributed by a plugin, keyed by command segment.
pub type CommandMap = BTreeMap<String, Arc<dyn PluginCommand>>;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin
// ─────────────────────────────────────────────────────────────────────────────

/// A loadable unit contributing commands to the CLI.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name. Also the registry key.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str;

    /// Words that prefix every command of this plugin.
    ///
    /// `None` prefixes with the plugin name, `Some("")` registers commands at
    /// the top level, any other value is used as-is.
    fn command_prefix(&self) -> Option<&str> {
        None
    }

    /// Commands this plugin contributes.
    fn commands(&self) -> CommandMap {
        CommandMap::new()
    }

    /// Called once after validation, before the plugin is registered.
    async fn on_load(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once before the plugin is removed from the catalog.
    async fn on_unload(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// A single command handler.
#[async_trait]
pub trait PluginCommand: Send + Sync {
    /// One-line help text.
    fn description(&self) -> &str;

    /// Declare arguments and options on the command node.
    ///
    /// The node arrives named and described. A command that declares no
    /// arguments receives a trailing catch-all `args` positional afterwards.
    fn setup(&self, command: clap::Command) -> anyhow::Result<clap::Command> {
        Ok(command)
    }

    /// Run the command.
    async fn execute(&self, input: CommandInput, ctx: ExecutionContext) -> anyhow::Result<()>;
}

/// Parsed arguments handed to [`PluginCommand::execute`].
///
/// Values are the raw strings the user typed; typed parsing is up to the
/// command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInput {
    /// Positional values, in declaration order.
    pub args: Vec<String>,
    /// Option values keyed by argument id. Flags appear as `"true"`/`"false"`.
    pub options: BTreeMap<String, Vec<String>>,
}

impl CommandInput {
    pub fn new(args: Vec<String>) -> Self {
        Self {
            args,
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.entry(id.into()).or_default().push(value.into());
        self
    }

    /// First value of an option.
    pub fn option(&self, id: &str) -> Option<&str> {
        self.options
            .get(id)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Whether a boolean flag was set.
    pub fn flag(&self, id: &str) -> bool {
        self.option(id) == Some("true")
    }
}
