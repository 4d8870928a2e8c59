//! Configuration schema for pt.toml.
//!
//! Every struct deserializes in strict mode: keys outside the declared
//! schema are rejected with an error naming the offending field.

use clap::ValueEnum;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;

/// Top-level configuration: the contents of `pt.toml` or the `[tool.pt]`
/// table of `pyproject.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Project-level settings.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Global environment variables applied to every task.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Named dependency groups: group name -> package specifiers.
    #[serde(default)]
    pub dependencies: IndexMap<String, Vec<String>>,

    /// Task definitions, keyed by task name.
    #[serde(default)]
    pub tasks: IndexMap<String, TaskConfig>,

    /// Profile overlays, keyed by profile name.
    #[serde(default)]
    pub profiles: IndexMap<String, ProfileConfig>,

    /// Pipeline definitions, keyed by pipeline name.
    #[serde(default)]
    pub pipelines: IndexMap<String, PipelineConfig>,
}

/// The `[project]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project name, shown by `pt check`.
    pub name: Option<String>,

    /// Default Python interpreter version (e.g. "3.12").
    pub python: Option<String>,

    /// Profile used when none is selected via flag or `PT_PROFILE`.
    pub default_profile: Option<String>,

    /// Task invoked when any task fails (the global error handler).
    pub on_error_task: Option<String>,

    /// Env files loaded for every task, in declared order.
    #[serde(default)]
    pub env_files: Vec<String>,
}

/// A `[tasks.<name>]` table as written in the config file.
///
/// This is the raw, pre-resolution form: it may carry an `extend` reference
/// and leave `script`/`cmd` to be completed by an ancestor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Path to a script file to run through the isolated runner.
    pub script: Option<String>,

    /// Shell command string.
    pub cmd: Option<String>,

    /// Name of a task to inherit from.
    pub extend: Option<String>,

    /// Arguments appended to the invocation.
    #[serde(default)]
    pub args: Vec<String>,

    /// Package specifiers or dependency-group names.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Task-level environment variables (highest priority layer).
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Directories prepended to PYTHONPATH.
    #[serde(default)]
    pub pythonpath: Vec<String>,

    /// Tasks that must run before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Whether `depends_on` tasks are dispatched concurrently.
    pub parallel: Option<bool>,

    /// Python interpreter version override.
    pub python: Option<String>,

    /// Working directory, relative to the project root.
    pub cwd: Option<String>,

    /// Timeout in seconds; must be positive.
    pub timeout: Option<u64>,

    /// Non-zero exit does not count as a failure.
    pub ignore_errors: Option<bool>,

    /// Declarative execution gate.
    pub condition: Option<ConditionConfig>,

    /// Script whose zero exit admits the task.
    pub condition_script: Option<String>,

    /// Alternative names, each globally unique.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Tag strings for selection and listing.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Single category tag.
    pub category: Option<String>,

    /// Lifecycle hook scripts.
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Free-form description shown by `pt list`.
    pub description: Option<String>,
}

/// The `hooks` sub-table of a task: auxiliary scripts run around the task's
/// own subprocess.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HooksConfig {
    pub before_task: Option<String>,
    pub after_success: Option<String>,
    pub after_failure: Option<String>,
    pub after_task: Option<String>,
}

impl HooksConfig {
    /// True if no hook is configured.
    pub fn is_empty(&self) -> bool {
        self.before_task.is_none()
            && self.after_success.is_none()
            && self.after_failure.is_none()
            && self.after_task.is_none()
    }
}

/// A declarative condition; all present sub-conditions AND together.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionConfig {
    /// OS identifiers: `linux`, `darwin`, `windows`.
    #[serde(default)]
    pub platforms: Vec<String>,

    /// All listed variables must be present (any value).
    #[serde(default)]
    pub env_set: Vec<String>,

    /// None of the listed variables may be present.
    #[serde(default)]
    pub env_not_set: Vec<String>,

    /// Each listed variable must equal one of 1/true/yes/on (case-insensitive).
    #[serde(default)]
    pub env_true: Vec<String>,

    /// Each variable must match the given value exactly.
    #[serde(default)]
    pub env_equals: HashMap<String, String>,

    /// All listed paths must exist, relative to the project root.
    #[serde(default)]
    pub files_exist: Vec<String>,

    /// None of the listed paths may exist.
    #[serde(default)]
    pub files_not_exist: Vec<String>,
}

/// A `[profiles.<name>]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    /// Environment overlay applied above the global env.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Env files loaded after the global ones, in declared order.
    #[serde(default)]
    pub env_files: Vec<String>,

    /// Python interpreter version for this profile.
    pub python: Option<String>,

    /// Dependency groups overriding the global `[dependencies]` map.
    pub dependencies: Option<IndexMap<String, Vec<String>>>,
}

/// A `[pipelines.<name>]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Free-form description shown by `pt list`.
    pub description: Option<String>,

    /// Failure behavior across the pipeline.
    #[serde(default)]
    pub on_failure: OnFailure,

    /// Output capture mode for every stage.
    #[serde(default)]
    pub output: OutputMode,

    /// Ordered stages; each runs to completion before the next starts.
    pub stages: Vec<StageConfig>,
}

/// A single pipeline stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Tasks run in this stage.
    pub tasks: Vec<String>,

    /// Whether the stage's tasks run concurrently.
    #[serde(default)]
    pub parallel: bool,
}

/// What the scheduler does when a task in a group fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OnFailure {
    /// Cancel not-yet-started tasks and terminate in-flight ones.
    #[default]
    FailFast,

    /// Stop dispatching new tasks, let in-flight tasks complete.
    Wait,

    /// Keep scheduling; report an aggregated failure at the end.
    Continue,
}

/// How a group's stdout/stderr is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Capture fully, emit contiguously per task after it completes.
    #[default]
    Buffered,

    /// Stream live, each line prefixed with the task name.
    Interleaved,
}

/// Check a task identifier, alias, or tag against the allowed alphabet:
/// non-empty, alphanumerics plus `-` and `_`.
pub fn is_valid_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Check a Python version string: one to three dot-separated numbers,
/// e.g. "3", "3.12", "3.11.4".
pub fn is_valid_python_version(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    (1..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[project]
name = "demo"

[tasks.lint]
cmd = "ruff check src/"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.project.name.as_deref(), Some("demo"));
        assert_eq!(config.tasks.len(), 1);
        assert!(config.tasks.contains_key("lint"));
    }

    #[test]
    fn parse_full_task() {
        let toml = r#"
[tasks.test]
description = "Run tests"
cmd = "pytest"
args = ["-q"]
dependencies = ["testing"]
env = { DEBUG = "1" }
pythonpath = ["src", "tests"]
depends_on = ["lint"]
parallel = true
python = "3.12"
cwd = "."
timeout = 300
ignore_errors = false
aliases = ["t"]
tags = ["ci", "fast"]
category = "quality"
hooks = { before_task = "scripts/setup.py" }

[tasks.lint]
cmd = "ruff check ."
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let task = &config.tasks["test"];
        assert_eq!(task.cmd.as_deref(), Some("pytest"));
        assert_eq!(task.args, vec!["-q"]);
        assert_eq!(task.timeout, Some(300));
        assert_eq!(task.hooks.before_task.as_deref(), Some("scripts/setup.py"));
        assert_eq!(task.tags, vec!["ci", "fast"]);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let toml = r#"
[tasks.bad]
cmd = "true"
no_such_field = 1
"#;
        let err = toml::from_str::<Config>(toml).unwrap_err();
        assert!(err.to_string().contains("no_such_field"));
    }

    #[test]
    fn unknown_condition_key_is_rejected() {
        let toml = r#"
[tasks.gated]
cmd = "true"
condition = { platform = ["linux"] }
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn parse_pipeline_with_options() {
        let toml = r#"
[tasks.a]
cmd = "true"

[pipelines.ci]
on_failure = "continue"
output = "interleaved"
stages = [
    { tasks = ["a"], parallel = true },
    { tasks = ["a"] },
]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let pipe = &config.pipelines["ci"];
        assert_eq!(pipe.on_failure, OnFailure::Continue);
        assert_eq!(pipe.output, OutputMode::Interleaved);
        assert!(pipe.stages[0].parallel);
        assert!(!pipe.stages[1].parallel);
    }

    #[test]
    fn tasks_preserve_declaration_order() {
        let toml = r#"
[tasks.zeta]
cmd = "true"

[tasks.alpha]
cmd = "true"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let names: Vec<&String> = config.tasks.keys().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn name_validation() {
        assert!(is_valid_name("build-all"));
        assert!(is_valid_name("_private"));
        assert!(is_valid_name("t2"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("has space"));
        assert!(!is_valid_name("no/slash"));
    }

    #[test]
    fn python_version_validation() {
        assert!(is_valid_python_version("3"));
        assert!(is_valid_python_version("3.12"));
        assert!(is_valid_python_version("3.11.4"));
        assert!(!is_valid_python_version(""));
        assert!(!is_valid_python_version("3."));
        assert!(!is_valid_python_version("3.12.0.1"));
        assert!(!is_valid_python_version(">=3.10"));
    }
}
