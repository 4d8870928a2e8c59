//! Environment composition for task execution.
//!
//! Every subprocess receives an owned copy of its environment: the parent
//! process env, the built-in `PT_*` variables, and the user-defined overlay
//! layered in that order, so built-ins never shadow anything the user set in
//! config or env files.

use crate::config::resolve::ResolvedTask;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variables passed to a subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    vars: HashMap<String, String>,
}

impl Environment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an environment from a map.
    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// Snapshot the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Builder: add a variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Set a variable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Get a variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Check if a variable exists.
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Merge another environment into this one; `other` wins per key.
    pub fn merge(&mut self, other: &Environment) {
        for (key, value) in &other.vars {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    /// Overlay a plain map; the map wins per key.
    pub fn overlay(&mut self, map: &HashMap<String, String>) {
        for (key, value) in map {
            self.vars.insert(key.clone(), value.clone());
        }
    }

    /// Iterate over the variables.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }
}

impl FromIterator<(String, String)> for Environment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Env vars any of which mark a CI environment.
const CI_MARKERS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "TRAVIS",
    "BUILDKITE",
    "JENKINS_URL",
    "TEAMCITY_VERSION",
];

/// Per-invocation facts surfaced to subprocesses as built-in variables.
#[derive(Debug, Clone, Default)]
pub struct RunFacts {
    pub project_root: PathBuf,
    pub config_file: PathBuf,
    pub profile: Option<String>,
    pub git_branch: Option<String>,
    pub git_commit: Option<String>,
    pub ci: bool,
}

impl RunFacts {
    /// Probe the environment once at startup.
    pub fn gather(root: &Path, config_file: &Path, profile: Option<&str>) -> Self {
        Self {
            project_root: root.to_path_buf(),
            config_file: config_file.to_path_buf(),
            profile: profile.map(str::to_string),
            git_branch: git_output(root, &["rev-parse", "--abbrev-ref", "HEAD"]),
            git_commit: git_output(root, &["rev-parse", "--short", "HEAD"]),
            ci: CI_MARKERS.iter().any(|var| std::env::var_os(var).is_some()),
        }
    }
}

fn git_output(root: &Path, args: &[&str]) -> Option<String> {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Built-in variables for one task (or for `pt exec` when `task` is `None`).
pub fn builtin_env(facts: &RunFacts, task: Option<&ResolvedTask>) -> Environment {
    let mut env = Environment::new()
        .with_var("PT_PROJECT_ROOT", facts.project_root.display().to_string())
        .with_var("PT_CONFIG_FILE", facts.config_file.display().to_string())
        .with_var("PT_CI", if facts.ci { "true" } else { "false" });

    if let Some(profile) = &facts.profile {
        env.set("PT_PROFILE", profile.clone());
    }
    if let Some(branch) = &facts.git_branch {
        env.set("PT_GIT_BRANCH", branch.clone());
    }
    if let Some(commit) = &facts.git_commit {
        env.set("PT_GIT_COMMIT", commit.clone());
    }

    if let Some(task) = task {
        env.set("PT_TASK_NAME", task.name.clone());
        if let Some(python) = &task.python {
            env.set("PT_PYTHON_VERSION", python.clone());
        }
        if let Some(category) = &task.category {
            env.set("PT_CATEGORY", category.clone());
        }
        if !task.tags.is_empty() {
            // Tags are kept sorted by resolution.
            env.set("PT_TAGS", task.tags.join(","));
        }
    }

    env
}

/// The full child environment for a task subprocess: process env, built-ins,
/// then the task's layered overlay, in increasing priority.
pub fn child_env(facts: &RunFacts, task: &ResolvedTask) -> Environment {
    let mut env = Environment::from_process();
    env.merge(&builtin_env(facts, Some(task)));
    env.overlay(&task.env);
    env
}
