//! Executable plugins.
//!
//! Any executable can be a plugin as long as it answers three subcommands.
//!
//! ## `describe`
//!
//! Prints a JSON descriptor on stdout and exits 0:
//!
//! ```json
//! {
//!   "name": "git-helpers",
//!   "version": "0.1.0",
//!   "description": "Git shortcuts",
//!   "commandPrefix": "git",
//!   "commands": {
//!     "commit": {
//!       "description": "Commit with a generated message",
//!       "args": [{"name": "paths", "multiple": true}],
//!       "flags": [{"name": "amend", "short": "a"}]
//!     }
//!   },
//!   "hooks": {"onLoad": true, "onUnload": false}
//! }
//! ```
//!
//! ## `on-load` / `on-unload`
//!
//! Invoked only when declared under `hooks`. Non-zero exit fails the hook.
//!
//! ## `run <segment>`
//!
//! A JSON-lines conversation. The host writes one `invoke` message on stdin:
//!
//! ```json
//! {"type": "invoke", "command": "commit", "args": ["src"], "options": {"amend": ["true"]}, "invocation": "..."}
//! ```
//!
//! and the plugin answers on stdout, one message per line:
//!
//! - `{"type": "log", "level": "info", "message": "..."}`
//! - `{"type": "output", "text": "..."}`: printed to the user
//! - `{"type": "config_get", "key": "..."}`: host replies `{"type": "config_value", "key": "...", "value": ...}`
//! - `{"type": "config_set", "key": "...", "value": ...}`
//! - `{"type": "generate", "prompt": "...", "temperature": 0.2, "maxTokens": 200}`: host replies
//!   `{"type": "generated", "text": "..."}` or `{"type": "generated", "error": "..."}`
//! - `{"type": "done"}` / `{"type": "error", "message": "..."}`
//!
//! Lines that are not protocol messages are printed verbatim. stderr is
//! passed through to the terminal. Exit 0 without an `error` message is
//! success.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use clap::{Arg, ArgAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_ai::GenerateRequest;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};

use crate::context::{ExecutionContext, LogLevel};
use crate::resolver::PluginFactory;
use crate::types::{CommandInput, CommandMap, Plugin, PluginCommand};

/// Default timeout for `<plugin> describe`.
pub const DEFAULT_DESCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable carrying the plugin directory.
pub const PLUGIN_DIR_ENV: &str = "TETHER_PLUGIN_DIR";

/// Environment variable carrying the invocation id during `run`.
pub const INVOCATION_ENV: &str = "TETHER_INVOCATION_ID";

/// Argument names owned by the host's help, version and global flags.
const RESERVED_FLAGS: &[&str] = &["help", "version", "verbose", "json"];
const RESERVED_SHORTS: &[char] = &['h', 'V', 'v'];

// ─────────────────────────────────────────────────────────────────────────────
// Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Output of `<plugin> describe`.
///
/// Identity fields stay optional here so a descriptor missing one reaches the
/// validator and is reported by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub command_prefix: Option<String>,
    #[serde(default)]
    pub commands: BTreeMap<String, CommandDescriptor>,
    #[serde(default)]
    pub hooks: HookDescriptor,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub args: Vec<ArgDescriptor>,
    #[serde(default)]
    pub flags: Vec<FlagDescriptor>,
}

/// A positional argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgDescriptor {
    pub name: String,
    #[serde(default)]
    pub help: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Accept one or more values.
    #[serde(default)]
    pub multiple: bool,
}

/// A `--long` option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagDescriptor {
    pub name: String,
    #[serde(default)]
    pub short: Option<char>,
    #[serde(default)]
    pub help: Option<String>,
    /// Takes a value instead of being a boolean switch.
    #[serde(default)]
    pub value: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDescriptor {
    #[serde(default)]
    pub on_load: bool,
    #[serde(default)]
    pub on_unload: bool,
}

/// Run `<exe> describe` and parse its descriptor.
pub async fn describe(
    exe: &Path,
    plugin_dir: &Path,
    timeout: Duration,
) -> anyhow::Result<PluginDescriptor> {
    let child = Command::new(exe)
        .arg("describe")
        .current_dir(plugin_dir)
        .env(PLUGIN_DIR_ENV, plugin_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn '{}'", exe.display()))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output.with_context(|| format!("'{}' describe failed", exe.display()))?,
        Err(_) => bail!(
            "'{}' describe timed out after {}s",
            exe.display(),
            timeout.as_secs()
        ),
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        bail!(
            "'{}' describe exited with code {}: {}",
            exe.display(),
            code,
            stderr.trim()
        );
    }
    if !stderr.trim().is_empty() {
        tracing::debug!(exe = %exe.display(), stderr = %stderr.trim(), "describe stderr");
    }

    serde_json::from_slice(&output.stdout)
        .with_context(|| format!("'{}' printed an invalid descriptor", exe.display()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory & plugin
// ─────────────────────────────────────────────────────────────────────────────

/// Instantiates an executable plugin by describing it.
#[derive(Debug, Clone)]
pub struct ProcessFactory {
    exe: PathBuf,
    plugin_dir: PathBuf,
    timeout: Duration,
}

impl ProcessFactory {
    pub fn new(exe: PathBuf, plugin_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            exe,
            plugin_dir,
            timeout,
        }
    }
}

#[async_trait]
impl PluginFactory for ProcessFactory {
    async fn instantiate(&self) -> anyhow::Result<Arc<dyn Plugin>> {
        let descriptor = describe(&self.exe, &self.plugin_dir, self.timeout).await?;
        Ok(Arc::new(ProcessPlugin::new(
            self.exe.clone(),
            self.plugin_dir.clone(),
            descriptor,
        )))
    }
}

/// A plugin backed by an executable.
pub struct ProcessPlugin {
    exe: PathBuf,
    plugin_dir: PathBuf,
    descriptor: PluginDescriptor,
    commands: CommandMap,
}

impl ProcessPlugin {
    pub fn new(exe: PathBuf, plugin_dir: PathBuf, descriptor: PluginDescriptor) -> Self {
        let commands = descriptor
            .commands
            .iter()
            .map(|(segment, decl)| {
                let command: Arc<dyn PluginCommand> = Arc::new(ProcessCommand {
                    exe: exe.clone(),
                    plugin_dir: plugin_dir.clone(),
                    segment: segment.clone(),
                    decl: decl.clone(),
                });
                (segment.clone(), command)
            })
            .collect();

        Self {
            exe,
            plugin_dir,
            descriptor,
            commands,
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn run_hook(&self, action: &str) -> anyhow::Result<()> {
        let output = Command::new(&self.exe)
            .arg(action)
            .current_dir(&self.plugin_dir)
            .env(PLUGIN_DIR_ENV, &self.plugin_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn '{}' {action}", self.exe.display()))?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            bail!(
                "{action} exited with code {}: {}",
                code,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for ProcessPlugin {
    fn name(&self) -> &str {
        self.descriptor.name.as_deref().unwrap_or_default()
    }

    fn version(&self) -> &str {
        self.descriptor.version.as_deref().unwrap_or_default()
    }

    fn description(&self) -> &str {
        self.descriptor.description.as_deref().unwrap_or_default()
    }

    fn command_prefix(&self) -> Option<&str> {
        self.descriptor.command_prefix.as_deref()
    }

    fn commands(&self) -> CommandMap {
        self.commands.clone()
    }

    async fn on_load(&self) -> anyhow::Result<()> {
        if !self.descriptor.hooks.on_load {
            return Ok(());
        }
        self.run_hook("on-load").await
    }

    async fn on_unload(&self) -> anyhow::Result<()> {
        if !self.descriptor.hooks.on_unload {
            return Ok(());
        }
        self.run_hook("on-unload").await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HostMessage<'a> {
    Invoke {
        command: &'a str,
        args: &'a [String],
        options: &'a BTreeMap<String, Vec<String>>,
        invocation: String,
    },
    ConfigValue {
        key: String,
        value: Option<Value>,
    },
    Generated {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PluginMessage {
    Log {
        #[serde(default)]
        level: LogLevel,
        message: String,
    },
    Output {
        text: String,
    },
    ConfigGet {
        key: String,
    },
    ConfigSet {
        key: String,
        value: Value,
    },
    Generate {
        prompt: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default, rename = "maxTokens")]
        max_tokens: Option<u32>,
    },
    Done,
    Error {
        message: String,
    },
}

/// One command of an executable plugin.
struct ProcessCommand {
    exe: PathBuf,
    plugin_dir: PathBuf,
    segment: String,
    decl: CommandDescriptor,
}

impl ProcessCommand {
    async fn send(&self, stdin: &mut ChildStdin, message: &HostMessage<'_>) {
        let mut line = match serde_json::to_string(message) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode plugin message");
                return;
            }
        };
        line.push('\n');
        // The plugin may exit without reading; that is its call.
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::debug!(segment = %self.segment, error = %e, "plugin stdin closed");
        }
    }
}

fn check_name(name: &str, seen: &mut BTreeSet<String>) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        bail!("argument names must not be empty");
    }
    if name.starts_with('-') || name.contains(char::is_whitespace) {
        bail!("invalid argument name '{name}'");
    }
    if RESERVED_FLAGS.contains(&name) {
        bail!("'{name}' is reserved by the host");
    }
    if !seen.insert(name.to_string()) {
        bail!("argument '{name}' is declared twice");
    }
    Ok(())
}

#[async_trait]
impl PluginCommand for ProcessCommand {
    fn description(&self) -> &str {
        &self.decl.description
    }

    fn setup(&self, mut command: clap::Command) -> anyhow::Result<clap::Command> {
        let mut seen = BTreeSet::new();

        for decl in &self.decl.args {
            check_name(&decl.name, &mut seen)?;
            let mut arg = Arg::new(decl.name.clone()).required(decl.required);
            arg = if decl.multiple {
                arg.num_args(1..).action(ArgAction::Append)
            } else {
                arg.num_args(1).action(ArgAction::Set)
            };
            if let Some(help) = &decl.help {
                arg = arg.help(help.clone());
            }
            command = command.arg(arg);
        }

        for decl in &self.decl.flags {
            check_name(&decl.name, &mut seen)?;
            let mut arg = Arg::new(decl.name.clone()).long(decl.name.clone());
            if let Some(short) = decl.short {
                if RESERVED_SHORTS.contains(&short) {
                    bail!("short flag '-{short}' is reserved by the host");
                }
                arg = arg.short(short);
            }
            arg = if decl.value {
                arg.num_args(1).action(ArgAction::Set)
            } else {
                arg.action(ArgAction::SetTrue)
            };
            if let Some(help) = &decl.help {
                arg = arg.help(help.clone());
            }
            command = command.arg(arg);
        }

        Ok(command)
    }

    async fn execute(&self, input: CommandInput, ctx: ExecutionContext) -> anyhow::Result<()> {
        let mut child = Command::new(&self.exe)
            .arg("run")
            .arg(&self.segment)
            .current_dir(&self.plugin_dir)
            .env(PLUGIN_DIR_ENV, &self.plugin_dir)
            .env(INVOCATION_ENV, ctx.invocation_id().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", self.exe.display()))?;

        let mut stdin = child.stdin.take().context("plugin stdin unavailable")?;
        let stdout = child.stdout.take().context("plugin stdout unavailable")?;
        let mut lines = BufReader::new(stdout).lines();

        self.send(
            &mut stdin,
            &HostMessage::Invoke {
                command: &self.segment,
                args: &input.args,
                options: &input.options,
                invocation: ctx.invocation_id().to_string(),
            },
        )
        .await;

        let mut done = false;
        let mut failure = None;

        while let Some(line) = lines
            .next_line()
            .await
            .context("failed to read plugin output")?
        {
            let Ok(message) = serde_json::from_str::<PluginMessage>(&line) else {
                println!("{line}");
                continue;
            };

            match message {
                PluginMessage::Log { level, message } => ctx.logger.log(level, &message),
                PluginMessage::Output { text } => println!("{text}"),
                PluginMessage::ConfigGet { key } => {
                    let value = match ctx.config.get(&key).await {
                        Ok(value) => value,
                        Err(e) => {
                            ctx.logger.warn(format!("config read failed: {e}"));
                            None
                        }
                    };
                    self.send(&mut stdin, &HostMessage::ConfigValue { key, value })
                        .await;
                }
                PluginMessage::ConfigSet { key, value } => {
                    ctx.config
                        .set(&key, value)
                        .await
                        .with_context(|| format!("failed to store config key '{key}'"))?;
                }
                PluginMessage::Generate {
                    prompt,
                    temperature,
                    max_tokens,
                } => {
                    let request = GenerateRequest {
                        prompt,
                        temperature,
                        max_tokens,
                    };
                    let reply = match ctx.ai.generate(request).await {
                        Ok(text) => HostMessage::Generated {
                            text: Some(text),
                            error: None,
                        },
                        Err(e) => HostMessage::Generated {
                            text: None,
                            error: Some(e.to_string()),
                        },
                    };
                    self.send(&mut stdin, &reply).await;
                }
                PluginMessage::Done => done = true,
                PluginMessage::Error { message } => failure = Some(message),
            }
        }

        drop(stdin);
        let status = child
            .wait()
            .await
            .context("failed to wait for plugin process")?;

        if let Some(message) = failure {
            bail!(message);
        }
        if !status.success() && !done {
            bail!(
                "'{}' run {} exited with code {}",
                self.exe.display(),
                self.segment,
                status.code().unwrap_or(-1)
            );
        }
        Ok(())
    }
}
