//! Config command - host configuration and the plugin key/value store.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};
use serde_json::Value;

use super::Context;
use crate::host::Host;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective host configuration
    Show,

    /// Show configuration, registry, store, and log paths
    Path,

    /// Write a config file with defaults
    Init,

    /// List every key in the plugin key/value store
    List,

    /// Get a value from the plugin key/value store
    Get {
        /// Key to read
        key: String,
    },

    /// Set a value in the plugin key/value store
    Set {
        /// Key to write
        key: String,

        /// Value, parsed as JSON when possible and stored as a string otherwise
        value: String,
    },

    /// Remove a value from the plugin key/value store
    Unset {
        /// Key to remove
        key: String,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, host: &Host, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(host, ctx),
        ConfigCommand::Path => cmd_path(host, ctx),
        ConfigCommand::Init => cmd_init(host),
        ConfigCommand::List => cmd_list(host, ctx).await,
        ConfigCommand::Get { key } => cmd_get(host, &key).await,
        ConfigCommand::Set { key, value } => cmd_set(host, &key, &value).await,
        ConfigCommand::Unset { key } => cmd_unset(host, &key).await,
    }
}

fn cmd_show(host: &Host, ctx: &Context) -> Result<()> {
    let loaded = &host.config;
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&loaded.config)?);
        return Ok(());
    }

    println!("# Tether Configuration\n");
    match &loaded.source {
        Some(source) => println!("Config file: {}\n", source.display()),
        None => println!("No config file loaded (using defaults)\n"),
    }
    println!("{}", loaded.config.to_toml()?);
    Ok(())
}

fn cmd_path(host: &Host, ctx: &Context) -> Result<()> {
    let loaded = &host.config;
    let paths = [
        ("config", loaded.config_path()),
        ("registry", loaded.registry_path()),
        ("store", loaded.store_path()),
        ("logs", loaded.log_dir()),
    ];

    if ctx.json_output {
        let map: serde_json::Map<String, Value> = paths
            .iter()
            .map(|(name, path)| (name.to_string(), Value::from(path.display().to_string())))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    for (name, path) in &paths {
        let marker = if path.exists() { "" } else { " (not created yet)" };
        println!("  {:<10} {}{}", name, path.display(), dim.apply_to(marker));
    }
    Ok(())
}

fn cmd_init(host: &Host) -> Result<()> {
    let path = host.config.config_path();
    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    tether_config::save_config(&tether_config::TetherConfig::default(), &path)?;
    println!("✓ Created config file: {}", path.display());
    Ok(())
}

async fn cmd_list(host: &Host, ctx: &Context) -> Result<()> {
    let entries = host.store().entries().await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("The key/value store is empty.");
        return Ok(());
    }

    println!("{}", style("Stored values").bold());
    for (key, value) in &entries {
        println!("  {:<24} {}", key, value);
    }
    Ok(())
}

async fn cmd_get(host: &Host, key: &str) -> Result<()> {
    match host.store().get(key).await? {
        Some(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        None => anyhow::bail!("key '{key}' is not set"),
    }
}

async fn cmd_set(host: &Host, key: &str, raw: &str) -> Result<()> {
    let value = parse_value(raw);
    host.store().set(key, value).await?;
    println!("✓ Set {key}");
    Ok(())
}

async fn cmd_unset(host: &Host, key: &str) -> Result<()> {
    if host.store().unset(key).await? {
        println!("✓ Removed {key}");
    } else {
        println!("Key '{key}' was not set");
    }
    Ok(())
}

/// JSON when the text parses as JSON, a plain string otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
