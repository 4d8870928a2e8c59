//! Invocation construction for the isolated runner.
//!
//! Translates an effective task into a concrete command: `uv run` with
//! `--with` dependencies and an optional `--python` version for scripts, a
//! single shell invocation for `cmd` tasks (wrapped in `uv run` only when
//! dependencies are needed), plus the child environment, working directory,
//! and timeout.

use crate::config::error::ConfigResult;
use crate::config::metadata::parse_inline_metadata;
use crate::config::resolve::{ResolvedTask, TaskKind};
use crate::core::environment::Environment;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The isolated-runner tool.
pub const UV: &str = "uv";

/// Shell used to interpret `cmd` strings.
const SHELL: &str = "bash";

/// A fully assembled subprocess invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Environment,
    pub cwd: PathBuf,
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Human-readable command line for logging.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }
}

/// Check that `uv` is installed and reachable.
pub fn check_uv_installed() -> bool {
    std::process::Command::new(UV)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Build the invocation for an effective task.
///
/// `extra_args` are CLI arguments appended after the task's own args. The
/// environment must already be the task's full child environment.
pub fn build_task_invocation(
    task: &ResolvedTask,
    extra_args: &[String],
    mut env: Environment,
    root: &Path,
) -> ConfigResult<Invocation> {
    let cwd = match &task.cwd {
        Some(dir) => root.join(dir),
        None => root.to_path_buf(),
    };
    apply_pythonpath(&mut env, &task.pythonpath, root);

    let timeout = task.timeout.map(Duration::from_secs);

    match &task.kind {
        TaskKind::Script(script) => {
            let script_path = root.join(script);
            let mut dependencies = task.dependencies.clone();
            if let Ok(source) = std::fs::read_to_string(&script_path) {
                let metadata = parse_inline_metadata(&source, &script_path)?;
                dependencies = merge_dependencies(&metadata.dependencies, &task.dependencies);
            }

            let mut args = vec!["run".to_string()];
            if let Some(python) = &task.python {
                args.push("--python".to_string());
                args.push(python.clone());
            }
            for dep in &dependencies {
                args.push("--with".to_string());
                args.push(dep.clone());
            }
            args.push(script_path.display().to_string());
            args.extend(task.args.iter().cloned());
            args.extend(extra_args.iter().cloned());

            Ok(Invocation {
                program: UV.to_string(),
                args,
                env,
                cwd,
                timeout,
            })
        }
        TaskKind::Cmd(cmd) => {
            let mut command_line = cmd.clone();
            for arg in task.args.iter().chain(extra_args) {
                command_line.push(' ');
                command_line.push_str(&shell_quote(arg));
            }

            if task.dependencies.is_empty() {
                // No isolated environment needed; dispatch as a plain shell
                // subprocess.
                Ok(Invocation {
                    program: SHELL.to_string(),
                    args: vec!["-c".to_string(), command_line],
                    env,
                    cwd,
                    timeout,
                })
            } else {
                let mut args = vec!["run".to_string()];
                if let Some(python) = &task.python {
                    args.push("--python".to_string());
                    args.push(python.clone());
                }
                for dep in &task.dependencies {
                    args.push("--with".to_string());
                    args.push(dep.clone());
                }
                args.push("--".to_string());
                args.push(SHELL.to_string());
                args.push("-c".to_string());
                args.push(command_line);

                Ok(Invocation {
                    program: UV.to_string(),
                    args,
                    env,
                    cwd,
                    timeout,
                })
            }
        }
    }
}

/// Build the invocation for `pt exec`: a bare script run where `uv` itself
/// honors any inline metadata.
pub fn build_exec_invocation(
    script: &Path,
    args: &[String],
    mut env: Environment,
    python: Option<&str>,
    pythonpath: &[String],
    root: &Path,
) -> Invocation {
    apply_pythonpath(&mut env, pythonpath, root);

    let mut run_args = vec!["run".to_string()];
    if let Some(python) = python {
        run_args.push("--python".to_string());
        run_args.push(python.to_string());
    }
    run_args.push(script.display().to_string());
    run_args.extend(args.iter().cloned());

    Invocation {
        program: UV.to_string(),
        args: run_args,
        env,
        cwd: root.to_path_buf(),
        timeout: None,
    }
}

/// Build the invocation for an auxiliary script (hook or condition script).
///
/// The script inherits the task's environment, pythonpath, interpreter
/// version, and working directory. Python files go through the isolated
/// runner; anything else is executed by the shell.
pub fn build_auxiliary_invocation(
    script: &str,
    mut env: Environment,
    python: Option<&str>,
    pythonpath: &[String],
    cwd: PathBuf,
    root: &Path,
) -> Invocation {
    apply_pythonpath(&mut env, pythonpath, root);
    let path = root.join(script);
    if script.ends_with(".py") {
        let mut args = vec!["run".to_string()];
        if let Some(python) = python {
            args.push("--python".to_string());
            args.push(python.to_string());
        }
        args.push(path.display().to_string());
        Invocation {
            program: UV.to_string(),
            args,
            env,
            cwd,
            timeout: None,
        }
    } else {
        Invocation {
            program: SHELL.to_string(),
            args: vec![path.display().to_string()],
            env,
            cwd,
            timeout: None,
        }
    }
}

/// Merge inline-metadata dependencies with the task's explicit ones. The
/// task's specifier wins when both name the same package.
fn merge_dependencies(metadata: &[String], task: &[String]) -> Vec<String> {
    let task_names: Vec<&str> = task.iter().map(|d| package_name(d)).collect();
    let mut merged: Vec<String> = metadata
        .iter()
        .filter(|dep| !task_names.contains(&package_name(dep)))
        .cloned()
        .collect();
    for dep in task {
        if !merged.contains(dep) {
            merged.push(dep.clone());
        }
    }
    merged
}

/// The package name portion of a specifier, e.g. `requests` in
/// `requests>=2.31` or `pkg[extra]==1.0`.
fn package_name(spec: &str) -> &str {
    let end = spec
        .find(|c: char| ['=', '<', '>', '!', '~', '[', '@', ';', ' '].contains(&c))
        .unwrap_or(spec.len());
    spec[..end].trim()
}

/// Prepend task `pythonpath` entries to any inherited PYTHONPATH, removing
/// duplicates while keeping first occurrences.
fn apply_pythonpath(env: &mut Environment, pythonpath: &[String], root: &Path) {
    if pythonpath.is_empty() {
        return;
    }

    let mut entries: Vec<PathBuf> = Vec::new();
    for dir in pythonpath {
        let path = root.join(dir);
        if !entries.contains(&path) {
            entries.push(path);
        }
    }
    if let Some(inherited) = env.get("PYTHONPATH") {
        for path in std::env::split_paths(inherited) {
            if !entries.contains(&path) {
                entries.push(path);
            }
        }
    }

    if let Ok(joined) = std::env::join_paths(&entries) {
        env.set("PYTHONPATH", joined.to_string_lossy().to_string());
    }
}

/// Quote an argument for a single shell invocation.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
