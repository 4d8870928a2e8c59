//! Configuration discovery, parsing, and invariant validation.
//!
//! Discovery walks upward from the working directory looking for `pt.toml`,
//! falling back to a `pyproject.toml` that carries a `[tool.pt]` table. The
//! directory containing the winning file becomes the project root.

use super::error::{ConfigError, ConfigResult};
use super::types::{is_valid_name, is_valid_python_version, Config};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// File names probed at each directory level, in priority order.
const CONFIG_FILE: &str = "pt.toml";
const PYPROJECT_FILE: &str = "pyproject.toml";

/// A parsed and validated configuration together with its origin.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The validated configuration.
    pub config: Config,

    /// Path of the file the configuration came from.
    pub path: PathBuf,

    /// The project root (directory containing the config file).
    pub root: PathBuf,
}

/// Load configuration from an explicit path, or discover it from the
/// current working directory.
pub fn load_config(explicit: Option<&Path>) -> ConfigResult<LoadedConfig> {
    match explicit {
        Some(path) => load_config_file(path),
        None => {
            let cwd = std::env::current_dir().map_err(|source| ConfigError::FileRead {
                path: PathBuf::from("."),
                source,
            })?;
            let path = find_config_file_from(&cwd)?;
            load_config_file(&path)
        }
    }
}

/// Walk upward from `start` looking for a config file.
pub fn find_config_file_from(start: &Path) -> ConfigResult<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Ok(candidate);
        }
        let pyproject = dir.join(PYPROJECT_FILE);
        if pyproject.is_file() && pyproject_has_tool_table(&pyproject) {
            return Ok(pyproject);
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => {
                return Err(ConfigError::NotFound {
                    start: start.to_path_buf(),
                })
            }
        }
    }
}

fn pyproject_has_tool_table(path: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(value) = content.parse::<toml::Value>() else {
        return false;
    };
    value
        .get("tool")
        .and_then(|tool| tool.get("pt"))
        .is_some()
}

/// Parse and validate a specific config file.
pub fn load_config_file(path: &Path) -> ConfigResult<LoadedConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let config = if path.file_name().and_then(|n| n.to_str()) == Some(PYPROJECT_FILE) {
        parse_pyproject(&content, path)?
    } else {
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?
    };

    validate(&config)?;

    let root = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(LoadedConfig {
        config,
        path: path.to_path_buf(),
        root,
    })
}

fn parse_pyproject(content: &str, path: &Path) -> ConfigResult<Config> {
    let value: toml::Value = content.parse().map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    let table = value
        .get("tool")
        .and_then(|tool| tool.get("pt"))
        .cloned()
        .ok_or_else(|| {
            ConfigError::Invalid(format!("no [tool.pt] table in '{}'", path.display()))
        })?;
    table.try_into().map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Validate field-level invariants across the whole configuration.
///
/// Inheritance-dependent rules (the exactly-one-of-script/cmd requirement
/// and `extend` cycle detection) are enforced during resolution; dependency
/// cycles are caught when the task graph is built.
pub fn validate(config: &Config) -> ConfigResult<()> {
    let mut namespace: HashSet<&str> = HashSet::new();

    for (name, task) in &config.tasks {
        if !is_valid_name(name) {
            return Err(ConfigError::Invalid(format!(
                "invalid task name '{name}': allowed characters are [A-Za-z0-9_-]"
            )));
        }
        if !namespace.insert(name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate name in task namespace: '{name}'"
            )));
        }

        if task.script.is_some() && task.cmd.is_some() {
            return Err(ConfigError::Invalid(format!(
                "task '{name}': 'script' and 'cmd' are mutually exclusive"
            )));
        }

        if task.timeout == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "task '{name}': timeout must be positive"
            )));
        }

        if let Some(python) = &task.python {
            if !is_valid_python_version(python) {
                return Err(ConfigError::Invalid(format!(
                    "task '{name}': invalid python version '{python}'"
                )));
            }
        }

        for tag in &task.tags {
            if !is_valid_name(tag) {
                return Err(ConfigError::Invalid(format!(
                    "task '{name}': invalid tag '{tag}'"
                )));
            }
        }
        if let Some(category) = &task.category {
            if !is_valid_name(category) {
                return Err(ConfigError::Invalid(format!(
                    "task '{name}': invalid category '{category}'"
                )));
            }
        }

        for alias in &task.aliases {
            if !is_valid_name(alias) {
                return Err(ConfigError::Invalid(format!(
                    "task '{name}': invalid alias '{alias}'"
                )));
            }
        }
    }

    // Aliases share the namespace with task names (I1).
    for (name, task) in &config.tasks {
        for alias in &task.aliases {
            if !namespace.insert(alias.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "alias '{alias}' of task '{name}' collides with an existing name or alias"
                )));
            }
        }
    }

    for (name, task) in &config.tasks {
        if let Some(parent) = &task.extend {
            if !config.tasks.contains_key(parent) {
                return Err(ConfigError::Invalid(format!(
                    "task '{name}' extends unknown task '{parent}'"
                )));
            }
        }
        for dep in &task.depends_on {
            if !namespace.contains(dep.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "task '{name}' depends on unknown task '{dep}'"
                )));
            }
        }
    }

    if let Some(python) = &config.project.python {
        if !is_valid_python_version(python) {
            return Err(ConfigError::Invalid(format!(
                "project: invalid python version '{python}'"
            )));
        }
    }

    if let Some(handler) = &config.project.on_error_task {
        if !namespace.contains(handler.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "on_error_task names unknown task '{handler}'"
            )));
        }
    }

    if let Some(profile) = &config.project.default_profile {
        if !config.profiles.contains_key(profile) {
            return Err(ConfigError::Invalid(format!(
                "default_profile names unknown profile '{profile}'"
            )));
        }
    }

    for (name, profile) in &config.profiles {
        if let Some(python) = &profile.python {
            if !is_valid_python_version(python) {
                return Err(ConfigError::Invalid(format!(
                    "profile '{name}': invalid python version '{python}'"
                )));
            }
        }
    }

    for (name, pipeline) in &config.pipelines {
        if pipeline.stages.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "pipeline '{name}' has no stages"
            )));
        }
        for (idx, stage) in pipeline.stages.iter().enumerate() {
            if stage.tasks.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "pipeline '{name}' stage {idx} has no tasks"
                )));
            }
            for task in &stage.tasks {
                if !namespace.contains(task.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "pipeline '{name}' references unknown task '{task}'"
                    )));
                }
            }
        }
    }

    Ok(())
}
