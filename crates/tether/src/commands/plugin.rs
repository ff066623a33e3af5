//! Plugin management commands.
//!
//! Provides CLI subcommands for managing plugins:
//! - `tether plugin load` - Load a plugin directory and remember it
//! - `tether plugin remove` - Unload a plugin and forget it
//! - `tether plugin list` - List loaded plugins
//! - `tether plugin info` - Show one plugin and its commands
//! - `tether plugin commands` - Show every attached and skipped command
//! - `tether plugin dev` - Rebuild and reload a plugin while editing it

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use console::{Style, style};

use tether_plugin::{
    CommandTable, DevWatcher, LoadedPlugin, UnloadError, settle, spawn_watch_command,
    watch_command,
};

use super::Context;
use crate::host::Host;

/// Plugin management commands.
#[derive(Args, Debug)]
pub struct PluginArgs {
    #[command(subcommand)]
    pub command: PluginCommand,
}

#[derive(Subcommand, Debug)]
pub enum PluginCommand {
    /// Load a plugin from a directory and remember it for later runs
    Load(LoadArgs),

    /// Unload a plugin and forget it
    Remove(RemoveArgs),

    /// List loaded plugins
    List,

    /// Show a loaded plugin and its commands
    Info(InfoArgs),

    /// Show every attached plugin command and any that were skipped
    Commands,

    /// Run a plugin's build watcher and reload it on every change
    Dev(DevArgs),
}

/// Arguments for `tether plugin load`.
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Plugin directory
    pub path: PathBuf,
}

/// Arguments for `tether plugin remove`.
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Plugin name
    pub name: String,
}

/// Arguments for `tether plugin info`.
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Plugin name
    pub name: String,
}

/// Arguments for `tether plugin dev`.
#[derive(Args, Debug)]
pub struct DevArgs {
    /// Plugin directory
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

/// Run the plugin command.
pub async fn run(args: PluginArgs, host: &mut Host, ctx: &Context) -> Result<()> {
    match args.command {
        PluginCommand::Load(load_args) => run_load(load_args, host, ctx).await,
        PluginCommand::Remove(remove_args) => run_remove(remove_args, host, ctx).await,
        PluginCommand::List => run_list(host, ctx),
        PluginCommand::Info(info_args) => run_info(info_args, host, ctx),
        PluginCommand::Commands => run_commands(host, ctx),
        PluginCommand::Dev(dev_args) => run_dev(dev_args, host, ctx).await,
    }
}

/// Full paths of the attached commands owned by a plugin.
fn plugin_paths(table: &CommandTable, name: &str) -> Vec<String> {
    table
        .commands()
        .filter(|bound| bound.plugin == name)
        .map(|bound| bound.path.clone())
        .collect()
}

fn plugin_json(plugin: &LoadedPlugin, table: &CommandTable) -> serde_json::Value {
    serde_json::json!({
        "name": plugin.name(),
        "version": plugin.plugin.version(),
        "description": plugin.plugin.description(),
        "path": plugin.source_path.display().to_string(),
        "loadedAt": plugin.loaded_at.to_rfc3339(),
        "commands": plugin_paths(table, plugin.name()),
    })
}

/// Run `tether plugin load`.
async fn run_load(args: LoadArgs, host: &mut Host, ctx: &Context) -> Result<()> {
    let (name, version) = {
        let loaded = host.loader.load(&args.path).await?;
        (
            loaded.name().to_string(),
            loaded.plugin.version().to_string(),
        )
    };

    let table = host.command_table();
    if ctx.json_output {
        if let Some(loaded) = host.loader.get(&name) {
            println!("{}", serde_json::to_string_pretty(&plugin_json(loaded, &table))?);
        }
        return Ok(());
    }

    println!("✓ Loaded {} {}", style(&name).bold(), version);
    print_plugin_commands(&table, &name);
    Ok(())
}

/// Run `tether plugin remove`.
async fn run_remove(args: RemoveArgs, host: &mut Host, ctx: &Context) -> Result<()> {
    let outcome = match host.loader.unload(&args.name).await {
        Ok(()) => "removed",
        // Plugins that failed to load at startup are only in the registry.
        Err(UnloadError::NotFound(_)) => {
            if !host.loader.forget(&args.name).await? {
                anyhow::bail!("plugin '{}' is not loaded or registered", args.name);
            }
            "forgotten"
        }
        Err(e) => return Err(e.into()),
    };

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "name": args.name, "status": outcome })
        );
    } else if outcome == "removed" {
        println!("✓ Removed plugin: {}", args.name);
    } else {
        println!("✓ Forgot registry entry: {}", args.name);
    }
    Ok(())
}

/// Run `tether plugin list`.
fn run_list(host: &Host, ctx: &Context) -> Result<()> {
    let table = host.command_table();
    let plugins = host.loader.list();

    if ctx.json_output {
        let items: Vec<_> = plugins.iter().map(|p| plugin_json(p, &table)).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if plugins.is_empty() {
        println!("No plugins loaded.");
        println!("Load one with: tether plugin load <path>");
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Plugins").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    for plugin in plugins {
        println!(
            "  {} {}  {}",
            style(plugin.name()).cyan(),
            plugin.plugin.version(),
            dim.apply_to(plugin.source_path.display())
        );
        if ctx.verbose {
            println!("    {}", plugin.plugin.description());
        }
    }
    println!();
    println!("{} plugin(s), {} command(s)", plugins.len(), table.len());
    Ok(())
}

/// Run `tether plugin info`.
fn run_info(args: InfoArgs, host: &Host, ctx: &Context) -> Result<()> {
    let plugin = host
        .loader
        .get(&args.name)
        .with_context(|| format!("plugin '{}' is not loaded", args.name))?;
    let table = host.command_table();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&plugin_json(plugin, &table))?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style(plugin.name()).bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {:<12} {}", "version", plugin.plugin.version());
    println!("  {:<12} {}", "description", plugin.plugin.description());
    println!("  {:<12} {}", "path", plugin.source_path.display());
    println!("  {:<12} {}", "loaded", plugin.loaded_at.to_rfc3339());
    println!();
    print_plugin_commands(&table, plugin.name());
    Ok(())
}

/// Run `tether plugin commands`.
fn run_commands(host: &Host, ctx: &Context) -> Result<()> {
    let table = host.command_table();

    if ctx.json_output {
        let commands: Vec<_> = table
            .commands()
            .map(|bound| {
                serde_json::json!({
                    "path": bound.path,
                    "plugin": bound.plugin,
                    "description": bound.description(),
                })
            })
            .collect();
        let skipped: Vec<_> = table
            .skipped()
            .iter()
            .map(|skip| {
                serde_json::json!({
                    "path": skip.path,
                    "plugin": skip.plugin,
                    "reason": skip.reason.to_string(),
                })
            })
            .collect();
        let output = serde_json::json!({ "commands": commands, "skipped": skipped });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if table.is_empty() && table.skipped().is_empty() {
        println!("No plugin commands registered.");
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style("Plugin commands").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    for bound in table.commands() {
        println!(
            "  {:<24} {}  {}",
            bound.path,
            bound.description(),
            dim.apply_to(format!("({})", bound.plugin))
        );
    }
    print_skipped(&table, None);
    Ok(())
}

fn print_plugin_commands(table: &CommandTable, name: &str) {
    let paths = plugin_paths(table, name);
    if paths.is_empty() {
        println!("  (no commands)");
    }
    for path in paths {
        println!("  tether {path}");
    }
    print_skipped(table, Some(name));
}

fn print_skipped(table: &CommandTable, plugin: Option<&str>) {
    let yellow = Style::new().yellow();
    for skip in table
        .skipped()
        .iter()
        .filter(|skip| plugin.is_none_or(|name| skip.plugin == name))
    {
        println!(
            "  {} {} ({}): {}",
            yellow.apply_to("⚠ skipped"),
            skip.path,
            skip.plugin,
            skip.reason
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dev mode
// ─────────────────────────────────────────────────────────────────────────────

/// Run `tether plugin dev`.
///
/// Starts the build-watch command, loads the plugin, then reloads it on
/// every debounced change until Ctrl-C. Load failures are reported and the
/// session keeps watching.
async fn run_dev(args: DevArgs, host: &mut Host, ctx: &Context) -> Result<()> {
    let dir = std::path::absolute(&args.path)
        .with_context(|| format!("invalid plugin path '{}'", args.path.display()))?;
    if !dir.is_dir() {
        anyhow::bail!("'{}' is not a directory", dir.display());
    }

    let command = watch_command(&dir, &host.config.config.dev.watch_command)?;
    // Dropping the task handle detaches the command; it dies with the host.
    let _build = spawn_watch_command(&command, &dir);
    if command.is_empty() {
        tracing::info!("no watch command configured; reloading on file changes only");
    }

    reload(host, &dir, ctx).await;

    let debounce = host.config.config.dev.debounce();
    let watcher = DevWatcher::new(&dir).with_debounce(debounce);
    let (mut changes, _handle) = watcher.watch()?;
    println!(
        "Watching {} {}",
        dir.display(),
        Style::new().dim().apply_to("(Ctrl-C to stop)")
    );

    loop {
        tokio::select! {
            batch = changes.recv() => match batch {
                Some(batch) => {
                    tracing::debug!(changed = batch.paths.len(), "reloading plugin");
                    reload(host, &dir, ctx).await;
                    // Writes made by the reload's own hooks are not edits.
                    settle(&mut changes, debounce * 2).await;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("Stopped watching {}", dir.display());
    Ok(())
}

/// Load (or reload) the plugin and show what changed in the namespace.
async fn reload(host: &mut Host, dir: &Path, ctx: &Context) {
    let name = match host.loader.load(dir).await {
        Ok(loaded) => loaded.name().to_string(),
        Err(e) => {
            eprintln!("{} {e}", Style::new().red().apply_to("✗"));
            return;
        }
    };

    let table = host.command_table();
    if ctx.json_output {
        if let Some(loaded) = host.loader.get(&name) {
            println!("{}", plugin_json(loaded, &table));
        }
        return;
    }

    println!(
        "{} Reloaded {}",
        Style::new().green().apply_to("✓"),
        style(&name).bold()
    );
    print_plugin_commands(&table, &name);
}
