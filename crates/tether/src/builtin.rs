//! In-process plugins shipped with the binary.
//!
//! A plugin directory selects one with `"main": "builtin:<id>"` in its
//! `plugin.json`.

use std::sync::Arc;

use async_trait::async_trait;
use clap::{Arg, ArgAction};
use tether_ai::GenerateRequest;
use tether_plugin::{
    CommandInput, CommandMap, EntryResolver, ExecutionContext, Plugin, PluginCommand, factory_fn,
};

/// Register every builtin plugin with the resolver.
pub fn register(resolver: EntryResolver) -> EntryResolver {
    resolver.with_builtin("hello", factory_fn(|| HelloPlugin))
}

// ─────────────────────────────────────────────────────────────────────────────
// hello
// ─────────────────────────────────────────────────────────────────────────────

/// Store key counting greetings across runs.
const GREETINGS_KEY: &str = "hello.greetings";

/// Example plugin: `tether hello greet` and `tether hello summarize`.
pub struct HelloPlugin;

#[async_trait]
impl Plugin for HelloPlugin {
    fn name(&self) -> &str {
        "hello"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Greetings and summaries from the bundled example plugin"
    }

    fn commands(&self) -> CommandMap {
        let mut commands = CommandMap::new();
        commands.insert("greet".to_string(), Arc::new(Greet));
        commands.insert("summarize".to_string(), Arc::new(Summarize));
        commands
    }

    async fn on_load(&self) -> anyhow::Result<()> {
        tracing::debug!("hello plugin ready");
        Ok(())
    }
}

struct Greet;

#[async_trait]
impl PluginCommand for Greet {
    fn description(&self) -> &str {
        "Greet someone"
    }

    fn setup(&self, command: clap::Command) -> anyhow::Result<clap::Command> {
        Ok(command
            .arg(Arg::new("name").help("Who to greet").default_value("world"))
            .arg(
                Arg::new("shout")
                    .short('s')
                    .long("shout")
                    .action(ArgAction::SetTrue)
                    .help("Greet loudly"),
            ))
    }

    async fn execute(&self, input: CommandInput, ctx: ExecutionContext) -> anyhow::Result<()> {
        let name = input.args.first().map(String::as_str).unwrap_or("world");
        let mut greeting = format!("Hello, {name}!");
        if input.flag("shout") {
            greeting = greeting.to_uppercase();
        }
        println!("{greeting}");

        let count = ctx.config.get_as::<u64>(GREETINGS_KEY).await?.unwrap_or(0) + 1;
        ctx.config.set(GREETINGS_KEY, count).await?;
        ctx.logger.debug(format!("{count} greetings so far"));
        Ok(())
    }
}

struct Summarize;

#[async_trait]
impl PluginCommand for Summarize {
    fn description(&self) -> &str {
        "Summarize text with the configured AI client"
    }

    fn setup(&self, command: clap::Command) -> anyhow::Result<clap::Command> {
        Ok(command.arg(
            Arg::new("text")
                .help("Text to summarize")
                .num_args(0..)
                .trailing_var_arg(true),
        ))
    }

    async fn execute(&self, input: CommandInput, ctx: ExecutionContext) -> anyhow::Result<()> {
        let text = input.args.join(" ");
        if text.trim().is_empty() {
            anyhow::bail!("nothing to summarize");
        }

        ctx.logger.info(format!("summarizing {} characters", text.len()));
        let summary = ctx
            .ai
            .generate(
                GenerateRequest::new(format!("Summarize: {text}"))
                    .with_temperature(0.2)
                    .with_max_tokens(200),
            )
            .await?;
        println!("{summary}");
        Ok(())
    }
}
