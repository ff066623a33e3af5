//! Command namespace: attaches plugin commands to the CLI tree.
//!
//! Each plugin command gets a full path made of its plugin's prefix words
//! followed by the command segment:
//!
//! | `command_prefix()` | segment  | path           |
//! |--------------------|----------|----------------|
//! | `None`             | `commit` | `<name> commit`|
//! | `Some("")`         | `commit` | `commit`       |
//! | `Some("g")`        | `commit` | `g commit`     |
//!
//! Paths are registered first come, first served. A command is skipped with a
//! warning when its path is taken, starts with a reserved word, or would turn
//! an existing command into a group (or a group into a command).
//!
//! The namespace is built as a plain tree first and converted into
//! `clap::Command`s in one pass, so a skipped command never leaves a partial
//! node behind.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use clap::{Arg, ArgMatches};

use crate::context::{ContextFactory, ExecutionContext};
use crate::guard::{guarded, guarded_sync};
use crate::loader::LoadedPlugin;
use crate::types::{CommandInput, Plugin, PluginCommand};

/// Top-level words owned by the host.
pub const RESERVED_COMMANDS: &[&str] = &["plugin", "config", "help"];

/// Subcommand clap adds to every group. Never a plugin word at any depth.
const HELP_SUBCOMMAND: &str = "help";

/// Id of the catch-all positional given to commands without arguments.
pub const CATCH_ALL_ARG: &str = "args";

/// Full invocation path of a plugin command.
pub fn full_path(plugin: &dyn Plugin, segment: &str) -> String {
    let prefix = plugin.command_prefix().unwrap_or(plugin.name());
    prefix
        .split_whitespace()
        .chain(segment.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Why a command was not attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The path is empty.
    EmptyPath,
    /// The first word belongs to the host.
    Reserved(String),
    /// Another command already owns the path.
    Duplicate,
    /// An existing command sits where this path needs a group.
    ShadowsCommand(String),
    /// An existing group sits where this path needs a command.
    ShadowsGroup,
    /// `setup` failed or declared an unusable argument set.
    Setup(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPath => write!(f, "command path is empty"),
            Self::Reserved(word) => write!(f, "'{word}' is a reserved command"),
            Self::Duplicate => write!(f, "path is already registered"),
            Self::ShadowsCommand(path) => write!(f, "'{path}' is already a command"),
            Self::ShadowsGroup => write!(f, "path is already a command group"),
            Self::Setup(reason) => write!(f, "setup failed: {reason}"),
        }
    }
}

/// A command that did not make it into the table.
#[derive(Debug, Clone)]
pub struct SkippedCommand {
    pub plugin: String,
    pub path: String,
    pub reason: SkipReason,
}

/// Error from a plugin command. Already logged when returned.
#[derive(Debug, thiserror::Error)]
#[error("command '{path}' failed: {reason}")]
pub struct CommandError {
    pub path: String,
    pub reason: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Bound commands
// ─────────────────────────────────────────────────────────────────────────────

/// A plugin command attached at a full path.
#[derive(Clone)]
pub struct BoundCommand {
    pub path: String,
    pub plugin: String,
    pub command: Arc<dyn PluginCommand>,
    /// Positional ids in declaration order.
    positionals: Vec<String>,
    /// Non-positional ids declared by the command. Host globals are not
    /// part of the input.
    options: Vec<String>,
}

impl BoundCommand {
    pub fn description(&self) -> &str {
        self.command.description()
    }

    /// Collect the raw values of a leaf's matches.
    pub fn input(&self, matches: &ArgMatches) -> CommandInput {
        let mut input = CommandInput::default();
        for id in &self.positionals {
            input.args.extend(raw_values(matches, id));
        }
        for id in &self.options {
            let values = raw_values(matches, id);
            if !values.is_empty() {
                input.options.insert(id.clone(), values);
            }
        }
        input
    }

    /// Run the handler, containing errors and panics.
    pub async fn invoke(
        &self,
        input: CommandInput,
        ctx: ExecutionContext,
    ) -> Result<(), CommandError> {
        tracing::debug!(
            plugin = %self.plugin,
            command = %self.path,
            invocation = %ctx.invocation_id(),
            "dispatching plugin command"
        );

        guarded(self.command.execute(input, ctx))
            .await
            .map_err(|e| {
                let reason = format!("{e:#}");
                tracing::error!(
                    plugin = %self.plugin,
                    command = %self.path,
                    error = %reason,
                    "plugin command failed"
                );
                CommandError {
                    path: self.path.clone(),
                    reason,
                }
            })
    }

    /// Build the input and a fresh context, then invoke.
    pub async fn dispatch(
        &self,
        matches: &ArgMatches,
        contexts: &ContextFactory,
    ) -> Result<(), CommandError> {
        let input = self.input(matches);
        let ctx = contexts.create(&self.plugin, &self.path);
        self.invoke(input, ctx).await
    }
}

fn raw_values(matches: &ArgMatches, id: &str) -> Vec<String> {
    match matches.try_get_raw(id) {
        Ok(Some(raw)) => raw.map(|v| v.to_string_lossy().into_owned()).collect(),
        _ => Vec::new(),
    }
}

impl fmt::Debug for BoundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCommand")
            .field("path", &self.path)
            .field("plugin", &self.plugin)
            .field("positionals", &self.positionals)
            .field("options", &self.options)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Node {
    about: Option<String>,
    children: BTreeMap<String, Node>,
    /// Set on leaves; a node is either a leaf or a group.
    leaf: Option<clap::Command>,
}

impl Node {
    fn group(about: &str) -> Self {
        Self {
            about: Some(about.to_string()),
            ..Default::default()
        }
    }

    fn to_command(&self, name: &str) -> clap::Command {
        if let Some(leaf) = &self.leaf {
            return leaf.clone();
        }

        let mut command = clap::Command::new(name.to_string())
            .subcommand_required(true)
            .arg_required_else_help(true);
        if let Some(about) = &self.about {
            command = command.about(about.clone());
        }
        for (child_name, child) in &self.children {
            command = command.subcommand(child.to_command(child_name));
        }
        command
    }
}

/// Builds the plugin command tree.
#[derive(Debug)]
pub struct CommandNamespace {
    reserved: BTreeSet<String>,
    root: Node,
    commands: BTreeMap<String, BoundCommand>,
    skipped: Vec<SkippedCommand>,
}

impl Default for CommandNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandNamespace {
    pub fn new() -> Self {
        Self {
            reserved: RESERVED_COMMANDS.iter().map(|w| w.to_string()).collect(),
            root: Node::default(),
            commands: BTreeMap::new(),
            skipped: Vec::new(),
        }
    }

    /// Reserve an additional top-level word.
    pub fn reserve(mut self, word: impl Into<String>) -> Self {
        self.reserved.insert(word.into());
        self
    }

    /// Attach every loaded plugin, in order, and finish.
    pub fn build<'a>(mut self, plugins: impl IntoIterator<Item = &'a LoadedPlugin>) -> CommandTable {
        for loaded in plugins {
            self.add_plugin(&loaded.plugin);
        }
        self.finish()
    }

    /// Attach all commands of one plugin. Rejected commands are logged and
    /// recorded.
    pub fn add_plugin(&mut self, plugin: &Arc<dyn Plugin>) {
        for (segment, command) in plugin.commands() {
            if let Err(reason) = self.register(plugin.as_ref(), &segment, command) {
                let path = full_path(plugin.as_ref(), &segment);
                tracing::warn!(
                    plugin = %plugin.name(),
                    command = %path,
                    reason = %reason,
                    "skipping plugin command"
                );
                self.skipped.push(SkippedCommand {
                    plugin: plugin.name().to_string(),
                    path,
                    reason,
                });
            }
        }
    }

    /// Attach a single command.
    pub fn register(
        &mut self,
        plugin: &dyn Plugin,
        segment: &str,
        command: Arc<dyn PluginCommand>,
    ) -> Result<(), SkipReason> {
        let path = full_path(plugin, segment);
        let words: Vec<&str> = path.split(' ').filter(|w| !w.is_empty()).collect();
        let Some((last, groups)) = words.split_last() else {
            return Err(SkipReason::EmptyPath);
        };

        if self.reserved.contains(words[0]) {
            return Err(SkipReason::Reserved(words[0].to_string()));
        }
        if words.contains(&HELP_SUBCOMMAND) {
            return Err(SkipReason::Reserved(HELP_SUBCOMMAND.to_string()));
        }
        if self.commands.contains_key(&path) {
            return Err(SkipReason::Duplicate);
        }
        self.check_shape(&words)?;

        let leaf = prepare_leaf(last, command.as_ref())?;
        let positionals = leaf
            .get_positionals()
            .map(|arg| arg.get_id().to_string())
            .collect();
        let options = leaf
            .get_arguments()
            .filter(|arg| !arg.is_positional())
            .map(|arg| arg.get_id().to_string())
            .collect();

        let mut node = &mut self.root;
        for word in groups {
            node = node
                .children
                .entry(word.to_string())
                .or_insert_with(|| Node::group(plugin.description()));
        }
        node.children.entry(last.to_string()).or_default().leaf = Some(leaf);

        tracing::debug!(plugin = %plugin.name(), command = %path, "registered plugin command");
        self.commands.insert(
            path.clone(),
            BoundCommand {
                path,
                plugin: plugin.name().to_string(),
                command,
                positionals,
                options,
            },
        );
        Ok(())
    }

    /// Reject paths that would nest under a command or replace a group.
    fn check_shape(&self, words: &[&str]) -> Result<(), SkipReason> {
        let mut node = &self.root;
        for (depth, word) in words.iter().enumerate() {
            let Some(child) = node.children.get(*word) else {
                return Ok(());
            };
            let is_last = depth + 1 == words.len();
            if !is_last && child.leaf.is_some() {
                return Err(SkipReason::ShadowsCommand(words[..=depth].join(" ")));
            }
            if is_last && !child.children.is_empty() {
                return Err(SkipReason::ShadowsGroup);
            }
            node = child;
        }
        Ok(())
    }

    pub fn finish(self) -> CommandTable {
        CommandTable {
            root: self.root,
            commands: self.commands,
            skipped: self.skipped,
        }
    }
}

/// Run a command's setup and make sure the result is a usable leaf.
fn prepare_leaf(name: &str, command: &dyn PluginCommand) -> Result<clap::Command, SkipReason> {
    let node = clap::Command::new(name.to_string()).about(command.description().to_string());
    let mut leaf =
        guarded_sync(|| command.setup(node)).map_err(|e| SkipReason::Setup(format!("{e:#}")))?;

    if leaf.get_arguments().next().is_none() {
        leaf = leaf.arg(
            Arg::new(CATCH_ALL_ARG)
                .num_args(0..)
                .trailing_var_arg(true)
                .allow_hyphen_values(true),
        );
    }

    // clap validates argument definitions when the command is built.
    guarded_sync(|| {
        let mut built = leaf.clone();
        built.build();
        Ok(())
    })
    .map_err(|e| SkipReason::Setup(format!("{e:#}")))?;

    Ok(leaf)
}

// ─────────────────────────────────────────────────────────────────────────────
// Table
// ─────────────────────────────────────────────────────────────────────────────

/// Finished namespace: the command tree plus the path → handler table.
#[derive(Debug, Clone)]
pub struct CommandTable {
    root: Node,
    commands: BTreeMap<String, BoundCommand>,
    skipped: Vec<SkippedCommand>,
}

impl CommandTable {
    /// Add the plugin command tree under the host's root command.
    pub fn augment(&self, mut cli: clap::Command) -> clap::Command {
        for (name, node) in &self.root.children {
            cli = cli.subcommand(node.to_command(name));
        }
        cli
    }

    pub fn get(&self, path: &str) -> Option<&BoundCommand> {
        self.commands.get(path)
    }

    /// Bound commands, ordered by path.
    pub fn commands(&self) -> impl Iterator<Item = &BoundCommand> {
        self.commands.values()
    }

    pub fn skipped(&self) -> &[SkippedCommand] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Find the plugin command selected by parsed root matches, along with
    /// the leaf's own matches. `None` for host commands.
    pub fn resolve<'m>(&self, matches: &'m ArgMatches) -> Option<(&BoundCommand, &'m ArgMatches)> {
        let mut words = Vec::new();
        let mut current = matches;
        while let Some((name, sub)) = current.subcommand() {
            words.push(name);
            current = sub;
        }
        if words.is_empty() {
            return None;
        }
        self.commands
            .get(&words.join(" "))
            .map(|bound| (bound, current))
    }
}
