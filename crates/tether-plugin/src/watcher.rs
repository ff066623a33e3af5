//! Dev-mode support: build-watch subprocess and plugin directory watcher.
//!
//! `tether plugin dev` spawns the plugin's build-watch command in the
//! background, then reloads the plugin whenever files in its directory
//! change. Events are debounced to coalesce editor save bursts and compiler
//! output.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::RecommendedWatcher;
use notify_debouncer_mini::{DebouncedEventKind, Debouncer, new_debouncer};
use tokio::sync::mpsc;

use crate::manifest::{ManifestError, PluginManifest};

/// Directories whose changes never trigger a reload.
const IGNORED_DIRS: &[&str] = &[".git", "node_modules"];

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Error type for watcher setup.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to initialize file watcher: {0}")]
    Init(String),

    #[error("failed to watch '{path}': {reason}")]
    Watch { path: String, reason: String },
}

/// A batch of changed files in the plugin directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub paths: Vec<PathBuf>,
}

/// Watches one plugin directory.
#[derive(Debug, Clone)]
pub struct DevWatcher {
    plugin_dir: PathBuf,
    debounce: Duration,
}

impl DevWatcher {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Set the debounce duration.
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce = duration;
        self
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    /// Start watching.
    ///
    /// Returns a channel of change batches and a handle that owns the
    /// watcher. Dropping the handle stops watching and closes the channel.
    /// Dropping only the receiver ends the forwarding thread at the next
    /// change.
    pub fn watch(&self) -> Result<(mpsc::Receiver<ChangeBatch>, WatcherHandle), WatchError> {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut debouncer =
            new_debouncer(self.debounce, notify_tx).map_err(|e| WatchError::Init(e.to_string()))?;
        debouncer
            .watcher()
            .watch(&self.plugin_dir, notify::RecursiveMode::Recursive)
            .map_err(|e| WatchError::Watch {
                path: self.plugin_dir.display().to_string(),
                reason: e.to_string(),
            })?;

        let plugin_dir = self.plugin_dir.clone();
        // Ends once the debouncer is dropped and its sender goes with it.
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                let events = match result {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!(error = ?e, "file watcher error");
                        continue;
                    }
                };

                let paths: Vec<PathBuf> = events
                    .into_iter()
                    .filter(|event| event.kind == DebouncedEventKind::Any)
                    .map(|event| event.path)
                    .filter(|path| !is_ignored(path, &plugin_dir))
                    .collect();
                if paths.is_empty() {
                    continue;
                }

                tracing::debug!(changed = paths.len(), "plugin files changed");
                if event_tx.blocking_send(ChangeBatch { paths }).is_err() {
                    break;
                }
            }
        });

        Ok((
            event_rx,
            WatcherHandle {
                _debouncer: debouncer,
            },
        ))
    }
}

/// Whether a changed path sits under an ignored directory.
fn is_ignored(path: &Path, plugin_dir: &Path) -> bool {
    let relative = path.strip_prefix(plugin_dir).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(name) => IGNORED_DIRS.iter().any(|d| name == *d),
        _ => false,
    })
}

/// Handle that keeps the file watcher alive. Drop to stop watching.
pub struct WatcherHandle {
    _debouncer: Debouncer<RecommendedWatcher>,
}

/// Discard changes that arrive within `window`.
///
/// A reload may write into the plugin directory itself (an `on-load` hook
/// dropping a marker file, for example). Called right after a reload, this
/// swallows those echoes so they do not trigger another reload. Returns the
/// number of discarded batches.
pub async fn settle(changes: &mut mpsc::Receiver<ChangeBatch>, window: Duration) -> usize {
    let mut discarded = 0;
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(batch)) = tokio::time::timeout_at(deadline, changes.recv()).await {
        tracing::debug!(changed = batch.paths.len(), "ignoring changes made by the reload");
        discarded += 1;
    }
    discarded
}

// ─────────────────────────────────────────────────────────────────────────────
// Build-watch command
// ─────────────────────────────────────────────────────────────────────────────

/// Pick the build-watch command: the manifest's `watch`, else the fallback.
pub fn watch_command(plugin_dir: &Path, fallback: &[String]) -> Result<Vec<String>, ManifestError> {
    let declared = PluginManifest::load(plugin_dir)?
        .map(|m| m.watch)
        .unwrap_or_default();
    if !declared.is_empty() {
        return Ok(declared);
    }
    Ok(fallback.to_vec())
}

/// Spawn the build-watch command in the plugin directory and forget it.
///
/// Output goes straight to the terminal. A non-zero exit is logged as an
/// error; the dev session keeps running either way. Returns `None` when the
/// command is empty or cannot be started.
pub fn spawn_watch_command(
    command: &[String],
    plugin_dir: &Path,
) -> Option<tokio::task::JoinHandle<()>> {
    let (program, args) = command.split_first()?;

    let mut child = match tokio::process::Command::new(program)
        .args(args)
        .current_dir(plugin_dir)
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(command = %command.join(" "), error = %e, "failed to start watch command");
            return None;
        }
    };

    let shown = command.join(" ");
    tracing::info!(command = %shown, "watch command started");
    Some(tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => {
                tracing::info!(command = %shown, "watch command exited");
            }
            Ok(status) => {
                tracing::error!(
                    command = %shown,
                    code = status.code().unwrap_or(-1),
                    "watch command exited with an error"
                );
            }
            Err(e) => {
                tracing::error!(command = %shown, error = %e, "failed to wait for watch command");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_ignored_paths() {
        let dir = Path::new("/src/plugin");
        assert!(is_ignored(Path::new("/src/plugin/.git/index"), dir));
        assert!(is_ignored(Path::new("/src/plugin/node_modules/x/y.js"), dir));
        assert!(!is_ignored(Path::new("/src/plugin/src/main.rs"), dir));
        assert!(!is_ignored(Path::new("/src/plugin/target/release/plugin"), dir));
    }

    #[test]
    fn test_watch_command_prefers_manifest() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("plugin.json"),
            r#"{"watch": ["cargo", "watch", "-x", "build --release"]}"#,
        )
        .unwrap();

        let fallback = vec!["make".to_string()];
        assert_eq!(
            watch_command(tmp.path(), &fallback).unwrap(),
            vec!["cargo", "watch", "-x", "build --release"]
        );
    }

    #[test]
    fn test_watch_command_fallback() {
        let tmp = TempDir::new().unwrap();
        let fallback = vec!["make".to_string(), "watch".to_string()];
        assert_eq!(watch_command(tmp.path(), &fallback).unwrap(), fallback);
        assert!(watch_command(tmp.path(), &[]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_empty_command() {
        let tmp = TempDir::new().unwrap();
        assert!(spawn_watch_command(&[], tmp.path()).is_none());
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let tmp = TempDir::new().unwrap();
        let command = vec!["definitely-not-a-real-program-xyz".to_string()];
        assert!(spawn_watch_command(&command, tmp.path()).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_runs_in_plugin_dir() {
        let tmp = TempDir::new().unwrap();
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "touch built.txt; exit 2".to_string(),
        ];

        let handle = spawn_watch_command(&command, tmp.path()).unwrap();
        handle.await.unwrap();
        assert!(tmp.path().join("built.txt").exists());
    }

    #[tokio::test]
    async fn test_settle_discards_pending_batches() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(ChangeBatch {
            paths: vec![PathBuf::from("loaded.txt")],
        })
        .await
        .unwrap();
        tx.send(ChangeBatch {
            paths: vec![PathBuf::from("loaded.txt")],
        })
        .await
        .unwrap();

        assert_eq!(settle(&mut rx, Duration::from_millis(50)).await, 2);

        tx.send(ChangeBatch {
            paths: vec![PathBuf::from("src/main.rs")],
        })
        .await
        .unwrap();
        assert_eq!(rx.recv().await.unwrap().paths, vec![PathBuf::from("src/main.rs")]);
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_channel() {
        let tmp = TempDir::new().unwrap();
        let watcher = DevWatcher::new(tmp.path()).with_debounce(Duration::from_millis(50));
        let (mut rx, handle) = watcher.watch().unwrap();

        drop(handle);
        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("channel stayed open after the handle was dropped");
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_watch_reports_changes() {
        let tmp = TempDir::new().unwrap();
        let watcher = DevWatcher::new(tmp.path()).with_debounce(Duration::from_millis(50));
        let (mut rx, _handle) = watcher.watch().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(tmp.path().join("main.rs"), "fn main() {}").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for change")
            .unwrap();
        assert!(batch.paths.iter().any(|p| p.ends_with("main.rs")));
    }
}
