//! Tether - a command-line host that grows with plugins
//!
//! Main entry point for the Tether CLI.

use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};

mod builtin;
mod commands;
mod host;

use commands::{config, plugin};
use host::Host;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Tether - a command-line host that grows with plugins
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage plugins
    Plugin(plugin::PluginArgs),

    /// Manage host configuration and the plugin key/value store
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

const CONSOLE_FILTER: &str = "tether=info,tether_plugin=warn,tether_plugin::context=info,warn";
const CONSOLE_FILTER_VERBOSE: &str =
    "tether=debug,tether_plugin=debug,tether_config=debug,tether_ai=debug,info";
const FILE_FILTER: &str = "tether=trace,tether_plugin=trace,tether_config=trace,tether_ai=trace,info";

/// Console (human-readable, stderr) plus an optional rotating JSON file.
///
/// `RUST_LOG` overrides the console filter. The returned guard must live
/// until exit so buffered file output is flushed.
fn init_tracing(
    verbose: bool,
    loaded: &tether_config::LoadedConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            CONSOLE_FILTER_VERBOSE
        } else {
            CONSOLE_FILTER
        })
    });

    let mut guard = None;
    let file_layer = if loaded.config.logging.file {
        let appender = tracing_appender::rolling::daily(loaded.log_dir(), "tether.log");
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(appender);
        guard = Some(worker_guard);
        Some(
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(FILE_FILTER)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer)
        .init();

    guard
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Plugins load before argv can be parsed, so look for the verbose flag
    // by hand to get startup logging right.
    let verbose = std::env::args()
        .skip(1)
        .any(|arg| arg == "-v" || arg == "--verbose");

    let loaded = tether_config::load_config(None)?;
    let _guard = init_tracing(verbose, &loaded);

    let mut host = Host::start(loaded).await;
    let table = host.command_table();
    let matches = table.augment(Cli::command()).get_matches();

    if let Some((bound, leaf)) = table.resolve(&matches) {
        // Failures are logged by the dispatcher and never fail the host.
        let _ = bound.dispatch(leaf, host.contexts()).await;
        return Ok(());
    }

    let cli = Cli::from_arg_matches(&matches)?;

    // Create context for commands
    let ctx = commands::Context {
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Plugin(args) => plugin::run(args, &mut host, &ctx).await,
        Commands::Config(args) => config::run(args, &host, &ctx).await,
    }
}
