//! Inheritance and profile resolution.
//!
//! Turns the raw configuration into an effective task set: `extend` chains
//! are flattened under field-specific merge rules, the selected profile's
//! environment and dependency groups are layered in, and group names in task
//! dependency lists are expanded to package specifiers. Effective tasks
//! carry no `extend` field.

use super::envfile::parse_env_file;
use super::error::{ConfigError, ConfigResult};
use super::loader::LoadedConfig;
use super::types::{
    ConditionConfig, HooksConfig, PipelineConfig, ProjectConfig, TaskConfig,
};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

/// What an effective task executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// A script file dispatched through the isolated runner.
    Script(String),

    /// A shell command string.
    Cmd(String),
}

impl TaskKind {
    /// Short label used in listings.
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Script(_) => "script",
            TaskKind::Cmd(_) => "cmd",
        }
    }
}

/// A task after inheritance and profile resolution.
#[derive(Debug, Clone)]
pub struct ResolvedTask {
    pub name: String,
    pub kind: TaskKind,
    pub args: Vec<String>,
    /// Package specifiers with dependency groups already expanded.
    pub dependencies: Vec<String>,
    /// The full layered environment overlay (global through task level).
    pub env: HashMap<String, String>,
    pub pythonpath: Vec<String>,
    /// Canonical names of prerequisite tasks.
    pub depends_on: Vec<String>,
    pub parallel: bool,
    pub python: Option<String>,
    pub cwd: Option<String>,
    pub timeout: Option<u64>,
    pub ignore_errors: bool,
    pub condition: Option<ConditionConfig>,
    pub condition_script: Option<String>,
    pub aliases: Vec<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub hooks: HooksConfig,
    pub description: Option<String>,
    pub private: bool,
}

/// The effective configuration for one invocation of the runner.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub project: ProjectConfig,
    pub tasks: IndexMap<String, ResolvedTask>,
    pub pipelines: IndexMap<String, PipelineConfig>,
    /// The selected profile, if any.
    pub profile: Option<String>,
    /// The effective dependency-group map (global overlaid by profile).
    pub dependency_groups: IndexMap<String, Vec<String>>,
    /// Global + profile environment layers, without any task overlay.
    pub base_env: HashMap<String, String>,
    /// Profile/project-level Python version (used by `pt exec`).
    pub default_python: Option<String>,
    pub config_path: PathBuf,
    pub root: PathBuf,
    aliases: HashMap<String, String>,
}

impl ResolvedConfig {
    /// Resolve a task name or alias to the canonical task name.
    pub fn resolve_name(&self, name: &str) -> ConfigResult<String> {
        if self.tasks.contains_key(name) {
            Ok(name.to_string())
        } else if let Some(canonical) = self.aliases.get(name) {
            Ok(canonical.clone())
        } else {
            Err(ConfigError::UnknownTask(name.to_string()))
        }
    }

    /// Non-private tasks carrying all (or, with `match_all = false`, any) of
    /// the given tags, in declaration order.
    pub fn tasks_by_tags(&self, tags: &[String], match_all: bool) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| !t.private)
            .filter(|t| {
                if match_all {
                    tags.iter().all(|tag| t.tags.contains(tag))
                } else {
                    tags.iter().any(|tag| t.tags.contains(tag))
                }
            })
            .map(|t| t.name.clone())
            .collect()
    }

    /// Non-private tasks in the given category, in declaration order.
    pub fn tasks_by_category(&self, category: &str) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| !t.private && t.category.as_deref() == Some(category))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Every tag in use, mapped to the tasks carrying it (sorted).
    pub fn all_tags(&self) -> BTreeMap<String, Vec<String>> {
        let mut tags: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for task in self.tasks.values() {
            for tag in &task.tags {
                tags.entry(tag.clone()).or_default().push(task.name.clone());
            }
        }
        for names in tags.values_mut() {
            names.sort();
        }
        tags
    }
}

/// Resolve a loaded configuration under the given profile selection.
///
/// Profile precedence: explicit flag, then `PT_PROFILE`, then the project's
/// `default_profile`, then none.
pub fn resolve(loaded: &LoadedConfig, profile_flag: Option<&str>) -> ConfigResult<ResolvedConfig> {
    let config = &loaded.config;

    let profile_name = profile_flag
        .map(str::to_string)
        .or_else(|| std::env::var("PT_PROFILE").ok().filter(|p| !p.is_empty()))
        .or_else(|| config.project.default_profile.clone());

    let profile = match &profile_name {
        Some(name) => Some(
            config
                .profiles
                .get(name)
                .ok_or_else(|| ConfigError::UnknownProfile(name.clone()))?,
        ),
        None => None,
    };

    // Environment layers, lowest priority first. Later inserts win.
    let mut base_env: HashMap<String, String> = HashMap::new();
    for file in &config.project.env_files {
        for (key, value) in parse_env_file(&loaded.root.join(file))? {
            base_env.insert(key, value);
        }
    }
    for (key, value) in &config.env {
        base_env.insert(key.clone(), value.clone());
    }
    if let Some(profile) = profile {
        for file in &profile.env_files {
            for (key, value) in parse_env_file(&loaded.root.join(file))? {
                base_env.insert(key, value);
            }
        }
        for (key, value) in &profile.env {
            base_env.insert(key.clone(), value.clone());
        }
    }

    let mut dependency_groups = config.dependencies.clone();
    if let Some(groups) = profile.and_then(|p| p.dependencies.as_ref()) {
        for (name, packages) in groups {
            dependency_groups.insert(name.clone(), packages.clone());
        }
    }

    let default_python = profile
        .and_then(|p| p.python.clone())
        .or_else(|| config.project.python.clone());

    let aliases = alias_index(config);

    let mut tasks = IndexMap::with_capacity(config.tasks.len());
    for name in config.tasks.keys() {
        let merged = flatten_chain(config, name)?;
        let task = materialize(
            name,
            merged,
            &base_env,
            &dependency_groups,
            &default_python,
            &aliases,
        )?;
        tasks.insert(name.clone(), task);
    }

    Ok(ResolvedConfig {
        project: config.project.clone(),
        tasks,
        pipelines: config.pipelines.clone(),
        profile: profile_name,
        dependency_groups,
        base_env,
        default_python,
        config_path: loaded.path.clone(),
        root: loaded.root.clone(),
        aliases,
    })
}

fn alias_index(config: &super::types::Config) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    for (name, task) in &config.tasks {
        for alias in &task.aliases {
            aliases.insert(alias.clone(), name.clone());
        }
    }
    aliases
}

/// Compute the `extend` chain from root ancestor down to `name` and fold it
/// into a single raw task.
fn flatten_chain(config: &super::types::Config, name: &str) -> ConfigResult<TaskConfig> {
    let mut chain = vec![name.to_string()];
    let mut seen: HashSet<String> = HashSet::from([name.to_string()]);
    let mut current = name.to_string();

    loop {
        let parent = match config.tasks.get(&current).and_then(|t| t.extend.clone()) {
            Some(parent) => parent,
            None => break,
        };
        if !config.tasks.contains_key(&parent) {
            return Err(ConfigError::UnknownTask(parent));
        }
        if !seen.insert(parent.clone()) {
            chain.push(parent);
            return Err(ConfigError::ExtendCycle {
                chain: chain.join(" -> "),
            });
        }
        chain.push(parent.clone());
        current = parent;
    }

    // Ancestor-first order.
    chain.reverse();

    let mut merged = TaskConfig::default();
    for member in &chain {
        merged = merge_tasks(merged, &config.tasks[member]);
    }
    merged.extend = None;
    Ok(merged)
}

/// Apply the field-specific merge rules, `child` over `base`.
fn merge_tasks(mut base: TaskConfig, child: &TaskConfig) -> TaskConfig {
    // A descendant that sets either kind field replaces the pair, so a task
    // can switch between script and cmd along the chain.
    if child.script.is_some() || child.cmd.is_some() {
        base.script = child.script.clone();
        base.cmd = child.cmd.clone();
    }
    if child.cwd.is_some() {
        base.cwd = child.cwd.clone();
    }
    if child.timeout.is_some() {
        base.timeout = child.timeout;
    }
    if child.python.is_some() {
        base.python = child.python.clone();
    }
    if child.description.is_some() {
        base.description = child.description.clone();
    }
    if child.category.is_some() {
        base.category = child.category.clone();
    }
    if child.ignore_errors.is_some() {
        base.ignore_errors = child.ignore_errors;
    }
    if child.parallel.is_some() {
        base.parallel = child.parallel;
    }
    if child.condition.is_some() {
        base.condition = child.condition.clone();
    }
    if child.condition_script.is_some() {
        base.condition_script = child.condition_script.clone();
    }
    if child.hooks.before_task.is_some() {
        base.hooks.before_task = child.hooks.before_task.clone();
    }
    if child.hooks.after_success.is_some() {
        base.hooks.after_success = child.hooks.after_success.clone();
    }
    if child.hooks.after_failure.is_some() {
        base.hooks.after_failure = child.hooks.after_failure.clone();
    }
    if child.hooks.after_task.is_some() {
        base.hooks.after_task = child.hooks.after_task.clone();
    }

    base.dependencies = union_ordered(base.dependencies, &child.dependencies);
    base.pythonpath = union_ordered(base.pythonpath, &child.pythonpath);
    base.depends_on = union_ordered(base.depends_on, &child.depends_on);
    base.tags = union_ordered(base.tags, &child.tags);
    base.aliases = union_ordered(base.aliases, &child.aliases);
    base.args.extend(child.args.iter().cloned());
    for (key, value) in &child.env {
        base.env.insert(key.clone(), value.clone());
    }

    base
}

/// Union preserving first-occurrence order.
fn union_ordered(mut base: Vec<String>, extra: &[String]) -> Vec<String> {
    for item in extra {
        if !base.contains(item) {
            base.push(item.clone());
        }
    }
    base
}

fn materialize(
    name: &str,
    merged: TaskConfig,
    base_env: &HashMap<String, String>,
    groups: &IndexMap<String, Vec<String>>,
    default_python: &Option<String>,
    aliases: &HashMap<String, String>,
) -> ConfigResult<ResolvedTask> {
    let kind = match (merged.script, merged.cmd) {
        (Some(script), None) => TaskKind::Script(script),
        (None, Some(cmd)) => TaskKind::Cmd(cmd),
        (Some(_), Some(_)) => {
            return Err(ConfigError::Invalid(format!(
                "task '{name}': 'script' and 'cmd' are mutually exclusive"
            )))
        }
        (None, None) => {
            return Err(ConfigError::Invalid(format!(
                "task '{name}' must define exactly one of 'script' or 'cmd' \
                 (possibly via 'extend')"
            )))
        }
    };

    // Group names expand in place; anything not in the effective group map
    // passes through as a package specifier.
    let mut dependencies = Vec::new();
    for entry in &merged.dependencies {
        match groups.get(entry) {
            Some(packages) => {
                for package in packages {
                    if !dependencies.contains(package) {
                        dependencies.push(package.clone());
                    }
                }
            }
            None => {
                if !dependencies.contains(entry) {
                    dependencies.push(entry.clone());
                }
            }
        }
    }

    let mut env = base_env.clone();
    for (key, value) in &merged.env {
        env.insert(key.clone(), value.clone());
    }

    let depends_on = merged
        .depends_on
        .iter()
        .map(|dep| aliases.get(dep).cloned().unwrap_or_else(|| dep.clone()))
        .collect();

    let mut tags = merged.tags;
    tags.sort();

    let mut pythonpath = Vec::new();
    for dir in merged.pythonpath {
        if !pythonpath.contains(&dir) {
            pythonpath.push(dir);
        }
    }

    Ok(ResolvedTask {
        name: name.to_string(),
        kind,
        args: merged.args,
        dependencies,
        env,
        pythonpath,
        depends_on,
        parallel: merged.parallel.unwrap_or(false),
        python: merged.python.or_else(|| default_python.clone()),
        cwd: merged.cwd,
        timeout: merged.timeout,
        ignore_errors: merged.ignore_errors.unwrap_or(false),
        condition: merged.condition,
        condition_script: merged.condition_script,
        aliases: merged.aliases,
        tags,
        category: merged.category,
        hooks: merged.hooks,
        description: merged.description,
        private: name.starts_with('_'),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::validate;
    use crate::config::types::Config;

    fn resolve_str(toml: &str) -> ConfigResult<ResolvedConfig> {
        resolve_str_with_profile(toml, None)
    }

    fn resolve_str_with_profile(
        toml: &str,
        profile: Option<&str>,
    ) -> ConfigResult<ResolvedConfig> {
        let config: Config = toml::from_str(toml).unwrap();
        validate(&config)?;
        let loaded = LoadedConfig {
            config,
            path: PathBuf::from("pt.toml"),
            root: PathBuf::from("."),
        };
        resolve(&loaded, profile)
    }

    #[test]
    fn child_inherits_and_extends_parent() {
        let resolved = resolve_str(
            r#"
[tasks.a]
cmd = "echo 1"
args = ["x"]
env = { A = "1" }
tags = ["t1"]

[tasks.b]
extend = "a"
args = ["y"]
env = { B = "2" }
tags = ["t2"]
"#,
        )
        .unwrap();

        let b = &resolved.tasks["b"];
        assert_eq!(b.kind, TaskKind::Cmd("echo 1".to_string()));
        assert_eq!(b.args, vec!["x", "y"]);
        assert_eq!(b.env["A"], "1");
        assert_eq!(b.env["B"], "2");
        assert_eq!(b.tags, vec!["t1", "t2"]);
    }

    #[test]
    fn child_env_wins_per_key() {
        let resolved = resolve_str(
            r#"
[tasks.a]
cmd = "true"
env = { X = "parent", Y = "kept" }

[tasks.b]
extend = "a"
env = { X = "child" }
"#,
        )
        .unwrap();

        let b = &resolved.tasks["b"];
        assert_eq!(b.env["X"], "child");
        assert_eq!(b.env["Y"], "kept");
    }

    #[test]
    fn tags_union_is_sorted() {
        let resolved = resolve_str(
            r#"
[tasks.a]
cmd = "true"
tags = ["zeta", "mid"]

[tasks.b]
extend = "a"
tags = ["alpha"]
"#,
        )
        .unwrap();
        assert_eq!(resolved.tasks["b"].tags, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn scalar_fields_override_when_set() {
        let resolved = resolve_str(
            r#"
[tasks.a]
cmd = "true"
timeout = 30
ignore_errors = true
description = "parent"

[tasks.b]
extend = "a"
timeout = 60
"#,
        )
        .unwrap();

        let b = &resolved.tasks["b"];
        assert_eq!(b.timeout, Some(60));
        assert!(b.ignore_errors);
        assert_eq!(b.description.as_deref(), Some("parent"));
    }

    #[test]
    fn child_can_switch_cmd_to_script() {
        let resolved = resolve_str(
            r#"
[tasks.a]
cmd = "true"

[tasks.b]
extend = "a"
script = "b.py"
"#,
        )
        .unwrap();
        assert_eq!(resolved.tasks["b"].kind, TaskKind::Script("b.py".to_string()));
    }

    #[test]
    fn grandparent_chain_merges_in_order() {
        let resolved = resolve_str(
            r#"
[tasks.base]
cmd = "run"
args = ["1"]

[tasks.mid]
extend = "base"
args = ["2"]

[tasks.leaf]
extend = "mid"
args = ["3"]
"#,
        )
        .unwrap();
        assert_eq!(resolved.tasks["leaf"].args, vec!["1", "2", "3"]);
    }

    #[test]
    fn extend_cycle_names_the_cycle() {
        let err = resolve_str(
            r#"
[tasks.a]
extend = "b"

[tasks.b]
extend = "a"
"#,
        )
        .unwrap_err();

        match err {
            ConfigError::ExtendCycle { chain } => {
                assert!(chain.contains('a') && chain.contains('b'), "chain: {chain}");
            }
            other => panic!("expected ExtendCycle, got {other:?}"),
        }
    }

    #[test]
    fn task_without_kind_is_rejected() {
        let err = resolve_str("[tasks.empty]\ndepends_on = []\n").unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn resolution_is_idempotent_for_flat_tasks() {
        let toml = r#"
[tasks.a]
cmd = "echo hi"
args = ["x"]
tags = ["t"]
"#;
        let once = resolve_str(toml).unwrap();
        let twice = resolve_str(toml).unwrap();
        let a1 = &once.tasks["a"];
        let a2 = &twice.tasks["a"];
        assert_eq!(a1.args, a2.args);
        assert_eq!(a1.tags, a2.tags);
        assert_eq!(a1.kind, a2.kind);
    }

    #[test]
    fn dependency_groups_expand() {
        let resolved = resolve_str(
            r#"
[dependencies]
testing = ["pytest", "pytest-cov"]

[tasks.test]
cmd = "pytest"
dependencies = ["testing", "rich"]
"#,
        )
        .unwrap();
        assert_eq!(
            resolved.tasks["test"].dependencies,
            vec!["pytest", "pytest-cov", "rich"]
        );
    }

    #[test]
    fn profile_dependency_groups_override_global() {
        let resolved = resolve_str_with_profile(
            r#"
[dependencies]
testing = ["pytest"]

[profiles.ci]
dependencies = { testing = ["pytest", "pytest-xdist"] }

[tasks.test]
cmd = "pytest"
dependencies = ["testing"]
"#,
            Some("ci"),
        )
        .unwrap();
        assert_eq!(
            resolved.tasks["test"].dependencies,
            vec!["pytest", "pytest-xdist"]
        );
    }

    #[test]
    fn group_name_wins_over_package_spelling() {
        let resolved = resolve_str(
            r#"
[dependencies]
rich = ["rich==13.0"]

[tasks.t]
cmd = "true"
dependencies = ["rich"]
"#,
        )
        .unwrap();
        assert_eq!(resolved.tasks["t"].dependencies, vec!["rich==13.0"]);
    }

    #[test]
    fn env_layering_priority() {
        // Global env < profile env < task env.
        let resolved = resolve_str_with_profile(
            r#"
[env]
X = "global"
ONLY_GLOBAL = "g"

[profiles.dev]
env = { X = "profile", ONLY_PROFILE = "p" }

[tasks.t]
cmd = "true"
env = { X = "task" }
"#,
            Some("dev"),
        )
        .unwrap();

        let t = &resolved.tasks["t"];
        assert_eq!(t.env["X"], "task");
        assert_eq!(t.env["ONLY_GLOBAL"], "g");
        assert_eq!(t.env["ONLY_PROFILE"], "p");
        assert_eq!(resolved.base_env["X"], "profile");
    }

    #[test]
    fn python_fallback_chain() {
        let resolved = resolve_str_with_profile(
            r#"
[project]
python = "3.10"

[profiles.new]
python = "3.12"

[tasks.uses_profile]
cmd = "true"

[tasks.uses_own]
cmd = "true"
python = "3.11"
"#,
            Some("new"),
        )
        .unwrap();

        assert_eq!(resolved.tasks["uses_profile"].python.as_deref(), Some("3.12"));
        assert_eq!(resolved.tasks["uses_own"].python.as_deref(), Some("3.11"));
    }

    #[test]
    fn project_python_applies_without_profile() {
        let resolved = resolve_str(
            r#"
[project]
python = "3.10"

[tasks.t]
cmd = "true"
"#,
        )
        .unwrap();
        assert_eq!(resolved.tasks["t"].python.as_deref(), Some("3.10"));
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let err = resolve_str_with_profile("[tasks.t]\ncmd = \"true\"\n", Some("ghost"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile(_)));
    }

    #[test]
    fn depends_on_aliases_are_canonicalized() {
        let resolved = resolve_str(
            r#"
[tasks.lint]
cmd = "ruff check ."
aliases = ["l"]

[tasks.check]
cmd = "true"
depends_on = ["l"]
"#,
        )
        .unwrap();
        assert_eq!(resolved.tasks["check"].depends_on, vec!["lint"]);
    }

    #[test]
    fn resolve_name_accepts_aliases() {
        let resolved = resolve_str(
            r#"
[tasks.test]
cmd = "pytest"
aliases = ["t"]
"#,
        )
        .unwrap();
        assert_eq!(resolved.resolve_name("t").unwrap(), "test");
        assert_eq!(resolved.resolve_name("test").unwrap(), "test");
        assert!(matches!(
            resolved.resolve_name("ghost"),
            Err(ConfigError::UnknownTask(_))
        ));
    }

    #[test]
    fn leading_underscore_marks_private() {
        let resolved = resolve_str(
            r#"
[tasks._setup]
cmd = "true"

[tasks.build]
cmd = "true"
"#,
        )
        .unwrap();
        assert!(resolved.tasks["_setup"].private);
        assert!(!resolved.tasks["build"].private);
    }

    #[test]
    fn tag_selection_modes() {
        let resolved = resolve_str(
            r#"
[tasks.a]
cmd = "true"
tags = ["ci", "fast"]

[tasks.b]
cmd = "true"
tags = ["ci"]

[tasks._hidden]
cmd = "true"
tags = ["ci"]
"#,
        )
        .unwrap();

        let all = resolved.tasks_by_tags(&["ci".into(), "fast".into()], true);
        assert_eq!(all, vec!["a"]);

        let any = resolved.tasks_by_tags(&["ci".into(), "fast".into()], false);
        assert_eq!(any, vec!["a", "b"]);
    }

    #[test]
    fn pythonpath_dedupes_preserving_first() {
        let resolved = resolve_str(
            r#"
[tasks.a]
cmd = "true"
pythonpath = ["src", "lib"]

[tasks.b]
extend = "a"
pythonpath = ["lib", "tests"]
"#,
        )
        .unwrap();
        assert_eq!(resolved.tasks["b"].pythonpath, vec!["src", "lib", "tests"]);
    }
}
