//! Debounced file watching: re-run a task when matching files change.

use crate::config::error::{ConfigError, ConfigResult};
use crate::execution::process::wait_cancelled;
use crate::execution::runner::{RunResult, Runner};
use glob::Pattern;
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Watch parameters.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Glob patterns (relative to the project root) that trigger a re-run.
    pub patterns: Vec<String>,

    /// Glob patterns that never trigger, checked before `patterns`.
    pub ignore: Vec<String>,

    /// Debounce window for filesystem events.
    pub debounce: Duration,

    /// Clear the screen before each re-run.
    pub clear_screen: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["**/*.py".to_string()],
            ignore: vec![
                ".git/**".to_string(),
                "**/__pycache__/**".to_string(),
                "**/*.pyc".to_string(),
                ".venv/**".to_string(),
                "**/.venv/**".to_string(),
            ],
            debounce: Duration::from_millis(500),
            clear_screen: true,
        }
    }
}

/// Run the task once, then re-run it on every debounced batch of matching
/// file changes. Returns when the process-wide cancel signal fires.
pub async fn watch_and_run(
    runner: Arc<Runner>,
    task: &str,
    args: &[String],
    config: WatchConfig,
) -> RunResult<()> {
    let root = runner.config.root.clone();
    let patterns = compile_patterns(&config.patterns)?;
    let ignores = compile_patterns(&config.ignore)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
    let mut debouncer = new_debouncer(
        config.debounce,
        move |result: notify_debouncer_mini::DebounceEventResult| match result {
            Ok(events) => {
                let paths: Vec<PathBuf> = events.into_iter().map(|event| event.path).collect();
                let _ = tx.send(paths);
            }
            Err(e) => warn!(error = ?e, "file watcher error"),
        },
    )
    .map_err(|e| ConfigError::Invalid(format!("failed to create file watcher: {e}")))?;
    debouncer
        .watcher()
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| {
            ConfigError::Invalid(format!("failed to watch '{}': {e}", root.display()))
        })?;

    info!(
        task,
        patterns = ?config.patterns,
        debounce_ms = config.debounce.as_millis() as u64,
        "watching for changes"
    );

    run_once(&runner, task, args, config.clear_screen).await?;

    let mut cancel = runner.cancel_receiver();
    loop {
        tokio::select! {
            _ = wait_cancelled(&mut cancel) => break,
            changed = rx.recv() => {
                let Some(paths) = changed else { break };
                let relevant = paths
                    .iter()
                    .filter(|path| is_relevant(path, &root, &patterns, &ignores))
                    .count();
                if relevant == 0 {
                    continue;
                }
                info!(changed = relevant, "change detected; re-running");
                run_once(&runner, task, args, config.clear_screen).await?;
            }
        }
    }

    Ok(())
}

fn compile_patterns(patterns: &[String]) -> ConfigResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| ConfigError::Invalid(format!("invalid watch pattern '{p}': {e}")))
        })
        .collect()
}

fn is_relevant(path: &Path, root: &Path, patterns: &[Pattern], ignores: &[Pattern]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    if ignores.iter().any(|p| p.matches_path(relative)) {
        return false;
    }
    patterns.iter().any(|p| p.matches_path(relative))
}

async fn run_once(
    runner: &Arc<Runner>,
    task: &str,
    args: &[String],
    clear_screen: bool,
) -> RunResult<()> {
    if clear_screen {
        // ANSI clear + home.
        print!("\x1b[2J\x1b[1;1H");
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
    let report = runner.run_task(task, args).await?;
    if !report.success() {
        warn!(task, "task failed; waiting for changes");
    }
    Ok(())
}
