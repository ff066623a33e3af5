//! CLI integration tests for the Tether command-line interface.
//!
//! These tests verify:
//! - Help text is displayed correctly
//! - Plugins load, persist across runs, and attach their commands
//! - Plugin failures are contained and never take the host down
//! - The plugin key/value store is reachable from the CLI
//!
//! Every test runs against its own config directory via `TETHER_CONFIG_DIR`.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the tether binary bound to a config directory.
fn tether(config_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tether").unwrap();
    cmd.env("TETHER_CONFIG_DIR", config_dir).env_remove("RUST_LOG");
    cmd
}

/// Create a plugin directory using the bundled `hello` plugin.
fn hello_plugin(root: &Path) -> PathBuf {
    let dir = root.join("hello-plugin");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("plugin.json"),
        r#"{"name": "hello", "main": "builtin:hello"}"#,
    )
    .unwrap();
    dir
}

fn load(config_dir: &Path, plugin_dir: &Path) {
    tether(config_dir)
        .args(["plugin", "load"])
        .arg(plugin_dir)
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    let tmp = TempDir::new().unwrap();
    tether(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tether"))
        .stdout(predicate::str::contains("plugin"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_displays() {
    let tmp = TempDir::new().unwrap();
    tether(tmp.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tether"));
}

#[test]
fn test_no_args_shows_usage() {
    let tmp = TempDir::new().unwrap();
    tether(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unknown_command_rejected() {
    let tmp = TempDir::new().unwrap();
    tether(tmp.path())
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Lifecycle Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_plugin_list_empty() {
    let tmp = TempDir::new().unwrap();
    tether(tmp.path())
        .args(["plugin", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No plugins loaded"));
}

#[test]
fn test_load_builtin_plugin() {
    let tmp = TempDir::new().unwrap();
    let plugin_dir = hello_plugin(tmp.path());

    tether(tmp.path())
        .args(["plugin", "load"])
        .arg(&plugin_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded"))
        .stdout(predicate::str::contains("tether hello greet"))
        .stdout(predicate::str::contains("tether hello summarize"));

    let registry = fs::read_to_string(tmp.path().join("plugins.json")).unwrap();
    let registry: serde_json::Value = serde_json::from_str(&registry).unwrap();
    assert_eq!(
        registry["hello"],
        serde_json::Value::from(plugin_dir.display().to_string())
    );
}

#[test]
fn test_loaded_plugin_persists_across_runs() {
    let tmp = TempDir::new().unwrap();
    load(tmp.path(), &hello_plugin(tmp.path()));

    tether(tmp.path())
        .args(["plugin", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));

    tether(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"));
}

#[test]
fn test_plugin_list_json() {
    let tmp = TempDir::new().unwrap();
    load(tmp.path(), &hello_plugin(tmp.path()));

    let output = tether(tmp.path())
        .args(["--json", "plugin", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let plugins: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plugins[0]["name"], "hello");
    assert_eq!(
        plugins[0]["commands"],
        serde_json::json!(["hello greet", "hello summarize"])
    );
}

#[test]
fn test_plugin_info() {
    let tmp = TempDir::new().unwrap();
    load(tmp.path(), &hello_plugin(tmp.path()));

    tether(tmp.path())
        .args(["plugin", "info", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bundled example plugin"));

    tether(tmp.path())
        .args(["plugin", "info", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not loaded"));
}

#[test]
fn test_remove_plugin() {
    let tmp = TempDir::new().unwrap();
    load(tmp.path(), &hello_plugin(tmp.path()));

    tether(tmp.path())
        .args(["plugin", "remove", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed plugin: hello"));

    let registry = fs::read_to_string(tmp.path().join("plugins.json")).unwrap();
    assert!(!registry.contains("hello"));

    tether(tmp.path())
        .args(["hello", "greet"])
        .assert()
        .failure();
}

#[test]
fn test_remove_unknown_plugin_fails() {
    let tmp = TempDir::new().unwrap();
    tether(tmp.path())
        .args(["plugin", "remove", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not loaded or registered"));
}

#[test]
fn test_load_missing_directory_fails() {
    let tmp = TempDir::new().unwrap();
    tether(tmp.path())
        .args(["plugin", "load"])
        .arg(tmp.path().join("does-not-exist"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a directory"));

    assert!(!tmp.path().join("plugins.json").exists());
}

#[test]
fn test_load_unbuilt_plugin_fails() {
    let tmp = TempDir::new().unwrap();
    let plugin_dir = tmp.path().join("unbuilt");
    fs::create_dir_all(&plugin_dir).unwrap();

    tether(tmp.path())
        .args(["plugin", "load"])
        .arg(&plugin_dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("build the plugin first"));
}

#[test]
fn test_broken_registry_entry_does_not_block_startup() {
    let tmp = TempDir::new().unwrap();
    let plugin_dir = hello_plugin(tmp.path());
    let registry = serde_json::json!({
        "ghost": tmp.path().join("gone").display().to_string(),
        "hello": plugin_dir.display().to_string(),
    });
    fs::write(tmp.path().join("plugins.json"), registry.to_string()).unwrap();

    tether(tmp.path())
        .args(["hello", "greet", "Ada"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello, Ada!"))
        .stderr(predicate::str::contains("failed to restore saved plugin"));

    tether(tmp.path())
        .args(["plugin", "remove", "ghost"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Forgot registry entry: ghost"));
}

#[test]
fn test_malformed_registry_is_empty() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("plugins.json"), "{not json").unwrap();

    tether(tmp.path())
        .args(["plugin", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No plugins loaded"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Command Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_run_plugin_command() {
    let tmp = TempDir::new().unwrap();
    load(tmp.path(), &hello_plugin(tmp.path()));

    tether(tmp.path())
        .args(["hello", "greet", "Ada"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hello, Ada!"));

    tether(tmp.path())
        .args(["hello", "greet", "--shout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("HELLO, WORLD!"));
}

#[test]
fn test_plugin_command_uses_store() {
    let tmp = TempDir::new().unwrap();
    load(tmp.path(), &hello_plugin(tmp.path()));

    for _ in 0..3 {
        tether(tmp.path()).args(["hello", "greet"]).assert().success();
    }

    tether(tmp.path())
        .args(["config", "get", "hello.greetings"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3"));
}

#[test]
fn test_plugin_command_uses_ai_client() {
    let tmp = TempDir::new().unwrap();
    load(tmp.path(), &hello_plugin(tmp.path()));

    tether(tmp.path())
        .args(["hello", "summarize", "the", "quick", "fox"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stub completion: Summarize: the quick fox"));
}

#[test]
fn test_plugin_command_failure_is_contained() {
    let tmp = TempDir::new().unwrap();
    load(tmp.path(), &hello_plugin(tmp.path()));

    tether(tmp.path())
        .args(["hello", "summarize"])
        .assert()
        .success()
        .stderr(predicate::str::contains("nothing to summarize"));
}

#[test]
fn test_plugin_commands_listing() {
    let tmp = TempDir::new().unwrap();
    load(tmp.path(), &hello_plugin(tmp.path()));

    tether(tmp.path())
        .args(["plugin", "commands"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello greet"))
        .stdout(predicate::str::contains("Greet someone"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Executable Plugin Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(unix)]
mod executable {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const DESCRIBE: &str = r#"{"name": "shout", "version": "1.0.0", "description": "Echoes words loudly", "commandPrefix": "", "commands": {"shout": {"description": "Echo words", "args": [{"name": "words", "multiple": true}]}, "config": {"description": "Clashes with the host"}}}"#;

    /// A plugin speaking the stdio protocol from a shell script.
    fn shout_plugin(root: &Path) -> PathBuf {
        let dir = root.join("shout");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("plugin.json"), r#"{"main": "shout.sh"}"#).unwrap();

        let script = format!(
            r#"#!/bin/sh
case "$1" in
  describe)
    cat <<'JSON'
{DESCRIBE}
JSON
    ;;
  run)
    read invoke
    echo '{{"type": "output", "text": "SHOUTED"}}'
    echo '{{"type": "done"}}'
    ;;
esac
"#
        );
        let exe = dir.join("shout.sh");
        fs::write(&exe, script).unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        dir
    }

    #[test]
    fn test_run_executable_plugin() {
        let tmp = TempDir::new().unwrap();
        load(tmp.path(), &shout_plugin(tmp.path()));

        tether(tmp.path())
            .args(["shout", "a", "b"])
            .assert()
            .success()
            .stdout(predicate::str::contains("SHOUTED"));
    }

    #[test]
    fn test_reserved_command_skipped() {
        let tmp = TempDir::new().unwrap();
        load(tmp.path(), &shout_plugin(tmp.path()));

        tether(tmp.path())
            .args(["plugin", "commands"])
            .assert()
            .success()
            .stdout(predicate::str::contains("shout"))
            .stdout(predicate::str::contains("reserved command"));

        // The host's own config command still wins.
        tether(tmp.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("registry"));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_set_get_unset() {
    let tmp = TempDir::new().unwrap();

    tether(tmp.path())
        .args(["config", "set", "greeting", "hi"])
        .assert()
        .success();

    tether(tmp.path())
        .args(["config", "get", "greeting"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hi\""));

    tether(tmp.path())
        .args(["config", "unset", "greeting"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed greeting"));

    tether(tmp.path())
        .args(["config", "get", "greeting"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not set"));
}

#[test]
fn test_config_init_and_show() {
    let tmp = TempDir::new().unwrap();

    tether(tmp.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));
    assert!(tmp.path().join("config.toml").exists());

    tether(tmp.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[plugins]"))
        .stdout(predicate::str::contains("describe_timeout_secs = 30"));
}

#[test]
fn test_malformed_config_fails() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("config.toml"), "[plugins\n").unwrap();

    tether(tmp.path())
        .args(["plugin", "list"])
        .assert()
        .failure();
}
