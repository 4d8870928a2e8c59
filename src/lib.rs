//! pt - a declarative task runner for Python projects, powered by `uv`.
//!
//! Configuration lives in `pt.toml` (or a `[tool.pt]` table in
//! `pyproject.toml`) and describes tasks, task inheritance, profiles,
//! pipelines, and hooks. Execution resolves effective tasks through
//! inheritance and profile overlays, builds a dependency graph, and
//! dispatches subprocesses through `uv run` for per-invocation dependency
//! environments.

pub mod config;
pub mod core;
pub mod execution;
pub mod watch;

pub use crate::config::{
    load_config, resolve, Config, ConfigError, ConfigResult, LoadedConfig, OnFailure, OutputMode,
    ResolvedConfig, ResolvedTask, TaskKind,
};
pub use crate::core::{Environment, GraphError, TaskGraph};
pub use crate::execution::{
    check_uv_installed, run_group, run_pipeline, ExecutionResult, GroupOptions, RunError,
    RunReport, RunResult, Runner, TaskOutcome, TaskStatus,
};
pub use crate::watch::{watch_and_run, WatchConfig};
