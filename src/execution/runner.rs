//! Execution orchestrator.
//!
//! Runs tasks end-to-end: condition gating, the `before_task` hook, the
//! subprocess itself (through the isolated runner), the `after_*` hooks, and
//! the global error-handler task. Dependencies run first, honoring each
//! task's `parallel` flag; shared dependencies execute at most once per run.

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::metadata::parse_inline_metadata;
use crate::config::resolve::{ResolvedConfig, ResolvedTask};
use crate::core::condition::{self, Admission};
use crate::core::environment::{builtin_env, child_env, Environment};
use crate::core::environment::RunFacts;
use crate::core::graph::{GraphError, TaskGraph};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::invocation::{
    build_auxiliary_invocation, build_exec_invocation, build_task_invocation,
};
use super::process::{run_invocation, ExecutionResult, OutputSink};

/// Lines of stderr surfaced in failure reports and `PT_ERROR_STDERR`.
const STDERR_TAIL_LINES: usize = 20;

/// Errors that abort a run before or during graph construction.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type RunResult<T> = std::result::Result<T, RunError>;

/// Final status of one task within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed { code: i32 },
    /// Non-zero exit under `ignore_errors`; not a failure.
    Ignored { code: i32 },
    /// Gated out, pre-failed by `before_task`, or blocked by a failed
    /// dependency; not a failure.
    Skipped { reason: String },
    TimedOut,
    Interrupted,
}

impl TaskStatus {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskStatus::Failed { .. } | TaskStatus::TimedOut | TaskStatus::Interrupted
        )
    }

    /// The exit code this status contributes to the process exit.
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskStatus::Succeeded | TaskStatus::Ignored { .. } | TaskStatus::Skipped { .. } => 0,
            TaskStatus::Failed { code } => *code,
            TaskStatus::TimedOut => super::process::TIMEOUT_EXIT_CODE,
            TaskStatus::Interrupted => super::process::INTERRUPT_EXIT_CODE,
        }
    }

    /// Short label for summaries.
    pub fn label(&self) -> String {
        match self {
            TaskStatus::Succeeded => "succeeded".to_string(),
            TaskStatus::Failed { code } => format!("failed (exit {code})"),
            TaskStatus::Ignored { code } => format!("ignored (exit {code})"),
            TaskStatus::Skipped { reason } => format!("skipped: {reason}"),
            TaskStatus::TimedOut => "timed out".to_string(),
            TaskStatus::Interrupted => "interrupted".to_string(),
        }
    }
}

/// One task's outcome, with captured output when a subprocess ran.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub name: String,
    pub status: TaskStatus,
    pub result: Option<ExecutionResult>,
    pub duration: Duration,
}

impl TaskOutcome {
    pub fn success(&self) -> bool {
        !self.status.is_failure()
    }

    fn skipped(name: &str, reason: String) -> Self {
        Self {
            name: name.to_string(),
            status: TaskStatus::Skipped { reason },
            result: None,
            duration: Duration::ZERO,
        }
    }
}

/// Aggregated outcomes of a run, in execution order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: IndexMap<String, TaskOutcome>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.outcomes.values().all(TaskOutcome::success)
    }

    /// Exit code for the whole run: the first failing task's code, else 0.
    pub fn exit_code(&self) -> i32 {
        self.outcomes
            .values()
            .find(|oc| !oc.success())
            .map(|oc| oc.status.exit_code())
            .unwrap_or(0)
    }
}

/// Per-run shared state: one slot per task guaranteeing at-most-once
/// execution, plus the cancellation signal observed by every subprocess.
pub(crate) struct RunState {
    cells: std::sync::Mutex<HashMap<String, Arc<Mutex<Option<TaskOutcome>>>>>,
    pub(crate) cancel: watch::Receiver<bool>,
}

impl RunState {
    pub(crate) fn new(cancel: watch::Receiver<bool>) -> Self {
        Self {
            cells: std::sync::Mutex::new(HashMap::new()),
            cancel,
        }
    }

    fn cell(&self, name: &str) -> Arc<Mutex<Option<TaskOutcome>>> {
        let mut cells = self
            .cells
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(cells.entry(name.to_string()).or_default())
    }

    /// Collect completed outcomes in the given order.
    pub(crate) async fn report(&self, order: &[String]) -> RunReport {
        let mut report = RunReport::default();
        for name in order {
            let cell = self.cell(name);
            let slot = cell.lock().await;
            if let Some(outcome) = slot.as_ref() {
                report.outcomes.insert(name.clone(), outcome.clone());
            }
        }
        report
    }
}

/// Drives task execution for one invocation of the tool.
pub struct Runner {
    pub config: Arc<ResolvedConfig>,
    facts: RunFacts,
    cancel: watch::Receiver<bool>,
    /// Never fires; used for hooks that must run after cancellation.
    no_cancel: watch::Receiver<bool>,
    _no_cancel_tx: watch::Sender<bool>,
}

impl Runner {
    pub fn new(config: Arc<ResolvedConfig>, cancel: watch::Receiver<bool>) -> Self {
        let facts = RunFacts::gather(
            &config.root,
            &config.config_path,
            config.profile.as_deref(),
        );
        let (no_cancel_tx, no_cancel) = watch::channel(false);
        Self {
            config,
            facts,
            cancel,
            no_cancel,
            _no_cancel_tx: no_cancel_tx,
        }
    }

    pub(crate) fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    /// Run a single task (by name or alias) and its dependencies, streaming
    /// output to the terminal.
    pub async fn run_task(self: &Arc<Self>, name: &str, args: &[String]) -> RunResult<RunReport> {
        let canonical = self.config.resolve_name(name)?;
        let graph = TaskGraph::build(std::slice::from_ref(&canonical), &self.config.tasks)?;
        let state = Arc::new(RunState::new(self.cancel.clone()));

        self.run_node(
            canonical,
            Arc::clone(&state),
            args.to_vec(),
            OutputSink::Passthrough,
        )
        .await;

        Ok(state.report(&graph.topological_order()).await)
    }

    /// Run a standalone script with the project context (`pt exec`).
    pub async fn run_script(&self, script: &Path, args: &[String]) -> ConfigResult<ExecutionResult> {
        // Validate any metadata block up front so malformed scripts fail
        // before a subprocess is spawned.
        if let Ok(source) = std::fs::read_to_string(script) {
            parse_inline_metadata(&source, script)?;
        }

        let mut env = Environment::from_process();
        env.merge(&builtin_env(&self.facts, None));
        if let Some(stem) = script.file_stem() {
            env.set("PT_TASK_NAME", stem.to_string_lossy().to_string());
        }
        if let Some(python) = &self.config.default_python {
            env.set("PT_PYTHON_VERSION", python.clone());
        }
        env.overlay(&self.config.base_env);

        let invocation = build_exec_invocation(
            script,
            args,
            env,
            self.config.default_python.as_deref(),
            &[],
            &self.config.root,
        );
        info!(script = %script.display(), "running script");
        Ok(run_invocation(&invocation, &OutputSink::Passthrough, &self.cancel).await)
    }

    /// Run a node in the dependency graph, executing its dependencies first.
    ///
    /// The per-node slot makes execution at-most-once: concurrent callers of
    /// a shared dependency wait on its slot and observe the same outcome.
    pub(crate) fn run_node(
        self: &Arc<Self>,
        name: String,
        state: Arc<RunState>,
        args: Vec<String>,
        sink: OutputSink,
    ) -> Pin<Box<dyn Future<Output = TaskOutcome> + Send>> {
        let this = Arc::clone(self);
        Box::pin(async move {
            let cell = state.cell(&name);
            let mut slot = cell.lock().await;
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }

            let Some(task) = this.config.tasks.get(&name).cloned() else {
                // Unreachable after graph construction; recorded defensively.
                let outcome = TaskOutcome::skipped(&name, format!("unknown task '{name}'"));
                *slot = Some(outcome.clone());
                return outcome;
            };

            if !task.depends_on.is_empty() {
                debug!(
                    task = %name,
                    deps = ?task.depends_on,
                    parallel = task.parallel,
                    "running dependencies"
                );
                if let Some(failed) = this
                    .run_dependencies(&task, &state, &sink)
                    .await
                {
                    let outcome = TaskOutcome::skipped(
                        &name,
                        format!("dependency '{failed}' failed"),
                    );
                    *slot = Some(outcome.clone());
                    return outcome;
                }
            }

            let outcome = this
                .run_single(&task, &args, &sink, &state.cancel, true)
                .await;
            *slot = Some(outcome.clone());
            outcome
        })
    }

    /// Run a task's direct dependencies; returns the name of the first
    /// failed dependency, if any.
    async fn run_dependencies(
        self: &Arc<Self>,
        task: &ResolvedTask,
        state: &Arc<RunState>,
        sink: &OutputSink,
    ) -> Option<String> {
        if task.parallel && task.depends_on.len() > 1 {
            let mut handles = Vec::new();
            for dep in &task.depends_on {
                let future =
                    self.run_node(dep.clone(), Arc::clone(state), Vec::new(), sink.clone());
                handles.push((dep.clone(), tokio::spawn(future)));
            }
            let mut failed = None;
            for (dep, handle) in handles {
                let ok = match handle.await {
                    Ok(outcome) => outcome.success(),
                    Err(e) => {
                        error!(task = %dep, error = %e, "dependency task panicked");
                        false
                    }
                };
                if !ok && failed.is_none() {
                    failed = Some(dep);
                }
            }
            failed
        } else {
            for dep in &task.depends_on {
                let outcome = self
                    .run_node(dep.clone(), Arc::clone(state), Vec::new(), sink.clone())
                    .await;
                if !outcome.success() {
                    return Some(dep.clone());
                }
            }
            None
        }
    }

    /// Execute one task end-to-end: conditions, hooks, subprocess, error
    /// handler.
    pub(crate) async fn run_single(
        &self,
        task: &ResolvedTask,
        args: &[String],
        sink: &OutputSink,
        cancel: &watch::Receiver<bool>,
        invoke_error_handler: bool,
    ) -> TaskOutcome {
        let start = Instant::now();
        let env = child_env(&self.facts, task);

        if let Some(cond) = &task.condition {
            if let Admission::Denied(reason) = condition::evaluate(cond, &env, &self.config.root)
            {
                info!(task = %task.name, %reason, "task skipped");
                return TaskOutcome::skipped(&task.name, reason);
            }
        }

        if let Some(script) = &task.condition_script {
            let invocation = build_auxiliary_invocation(
                script,
                env.clone(),
                task.python.as_deref(),
                &task.pythonpath,
                self.task_cwd(task),
                &self.config.root,
            );
            let result = run_invocation(&invocation, &OutputSink::Buffered, cancel).await;
            if !result.success() {
                let reason = format!(
                    "condition script '{script}' exited with {}",
                    result.return_code
                );
                info!(task = %task.name, %reason, "task skipped");
                return TaskOutcome::skipped(&task.name, reason);
            }
        }

        if let Some(script) = &task.hooks.before_task {
            let result = self
                .run_hook(task, script, "before_task", None, &env, cancel)
                .await;
            if !result.success() {
                warn!(
                    task = %task.name,
                    hook = %script,
                    code = result.return_code,
                    "before_task hook failed; task skipped"
                );
                return TaskOutcome::skipped(
                    &task.name,
                    format!(
                        "before_task hook failed with exit code {}",
                        result.return_code
                    ),
                );
            }
        }

        let invocation = match build_task_invocation(task, args, env.clone(), &self.config.root) {
            Ok(invocation) => invocation,
            Err(e) => {
                error!(task = %task.name, error = %e, "failed to build invocation");
                return TaskOutcome {
                    name: task.name.clone(),
                    status: TaskStatus::Failed { code: 1 },
                    result: Some(ExecutionResult {
                        return_code: 1,
                        stderr: e.to_string(),
                        ..ExecutionResult::default()
                    }),
                    duration: start.elapsed(),
                };
            }
        };

        info!(task = %task.name, "task started");
        debug!(task = %task.name, command = %invocation.display_command(), "spawning");
        let result = run_invocation(&invocation, sink, cancel).await;
        let duration = start.elapsed();

        if result.cancelled {
            warn!(task = %task.name, "task interrupted");
            // The hook chain is short-circuited on cancellation; after_task
            // still runs because the subprocess was started. It observes the
            // quiet channel so the fired cancel signal cannot kill it.
            if let Some(script) = &task.hooks.after_task {
                let _ = self
                    .run_hook(
                        task,
                        script,
                        "after_task",
                        Some(result.return_code),
                        &env,
                        &self.no_cancel,
                    )
                    .await;
            }
            return TaskOutcome {
                name: task.name.clone(),
                status: TaskStatus::Interrupted,
                result: Some(result),
                duration,
            };
        }

        let status = if result.success() {
            TaskStatus::Succeeded
        } else if task.ignore_errors {
            TaskStatus::Ignored {
                code: result.return_code,
            }
        } else if result.timed_out {
            TaskStatus::TimedOut
        } else {
            TaskStatus::Failed {
                code: result.return_code,
            }
        };

        match &status {
            TaskStatus::Succeeded => {
                info!(task = %task.name, duration_ms = duration.as_millis() as u64, "task completed");
                if let Some(script) = &task.hooks.after_success {
                    let _ = self
                        .run_hook(task, script, "after_success", Some(0), &env, cancel)
                        .await;
                }
            }
            TaskStatus::Ignored { code } => {
                warn!(task = %task.name, code, "task failed (errors ignored)");
                if let Some(script) = &task.hooks.after_failure {
                    let _ = self
                        .run_hook(
                            task,
                            script,
                            "after_failure",
                            Some(result.return_code),
                            &env,
                            cancel,
                        )
                        .await;
                }
            }
            _ => {
                let tail = result.stderr_tail(STDERR_TAIL_LINES);
                error!(
                    task = %task.name,
                    code = result.return_code,
                    "task failed"
                );
                if !tail.is_empty() {
                    for line in tail.lines() {
                        error!(task = %task.name, "stderr: {line}");
                    }
                }
                if let Some(script) = &task.hooks.after_failure {
                    let _ = self
                        .run_hook(
                            task,
                            script,
                            "after_failure",
                            Some(result.return_code),
                            &env,
                            cancel,
                        )
                        .await;
                }
            }
        }

        if let Some(script) = &task.hooks.after_task {
            let _ = self
                .run_hook(
                    task,
                    script,
                    "after_task",
                    Some(result.return_code),
                    &env,
                    cancel,
                )
                .await;
        }

        if status.is_failure() && invoke_error_handler {
            self.run_error_handler(task, &result, sink, cancel).await;
        }

        TaskOutcome {
            name: task.name.clone(),
            status,
            result: Some(result),
            duration,
        }
    }

    /// Run a lifecycle hook with the task's effective environment plus the
    /// hook-only variables.
    async fn run_hook(
        &self,
        task: &ResolvedTask,
        script: &str,
        hook_type: &str,
        exit_code: Option<i32>,
        env: &Environment,
        cancel: &watch::Receiver<bool>,
    ) -> ExecutionResult {
        let mut env = env.clone();
        env.set("PT_HOOK_TYPE", hook_type);
        if let Some(code) = exit_code {
            env.set("PT_TASK_EXIT_CODE", code.to_string());
        }

        let invocation = build_auxiliary_invocation(
            script,
            env,
            task.python.as_deref(),
            &task.pythonpath,
            self.task_cwd(task),
            &self.config.root,
        );
        debug!(task = %task.name, hook = hook_type, script, "running hook");
        let result = run_invocation(&invocation, &OutputSink::Buffered, cancel).await;
        if !result.success() {
            warn!(
                task = %task.name,
                hook = hook_type,
                script,
                code = result.return_code,
                "hook exited non-zero"
            );
        }
        result
    }

    /// Invoke the global error-handler task, if configured. The handler
    /// never re-triggers itself, even when it fails or carries
    /// `ignore_errors`.
    async fn run_error_handler(
        &self,
        failed: &ResolvedTask,
        result: &ExecutionResult,
        sink: &OutputSink,
        cancel: &watch::Receiver<bool>,
    ) {
        let Some(handler_ref) = &self.config.project.on_error_task else {
            return;
        };
        let Ok(handler_name) = self.config.resolve_name(handler_ref) else {
            return;
        };
        if handler_name == failed.name {
            return;
        }
        let Some(handler) = self.config.tasks.get(&handler_name) else {
            return;
        };

        info!(
            handler = %handler_name,
            failed_task = %failed.name,
            "running error handler"
        );
        let mut handler = handler.clone();
        handler
            .env
            .insert("PT_FAILED_TASK".to_string(), failed.name.clone());
        handler
            .env
            .insert("PT_ERROR_CODE".to_string(), result.return_code.to_string());
        handler.env.insert(
            "PT_ERROR_STDERR".to_string(),
            result.stderr_tail(STDERR_TAIL_LINES),
        );

        let outcome = Box::pin(self.run_single(&handler, &[], sink, cancel, false)).await;
        if !outcome.success() {
            warn!(
                handler = %handler_name,
                "error handler failed; not invoking it again"
            );
        }
    }

    fn task_cwd(&self, task: &ResolvedTask) -> PathBuf {
        match &task.cwd {
            Some(dir) => self.config.root.join(dir),
            None => self.config.root.clone(),
        }
    }
}
