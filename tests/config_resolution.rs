//! Integration tests for configuration loading and resolution.

mod common;

use common::{project, resolve_project};
use pt::config::{find_config_file_from, ConfigError, TaskKind};
use pt::core::TaskGraph;
use std::fs;

#[test]
fn inheritance_flattens_chain() {
    let dir = project(
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
        &[],
    );

    let resolved = resolve_project(&dir, None).unwrap();
    let b = &resolved.tasks["b"];

    assert_eq!(b.kind, TaskKind::Cmd("echo 1".to_string()));
    assert_eq!(b.args, vec!["x", "y"]);
    assert_eq!(b.env["A"], "1");
    assert_eq!(b.env["B"], "2");
    assert_eq!(b.tags, vec!["t1", "t2"]);
}

#[test]
fn extend_cycle_is_a_config_error() {
    let dir = project(
        r#"
[tasks.a]
extend = "b"

[tasks.b]
extend = "a"
"#,
        &[],
    );

    let err = resolve_project(&dir, None).unwrap_err();
    match err {
        ConfigError::ExtendCycle { chain } => {
            assert!(chain.contains('a'), "chain: {chain}");
            assert!(chain.contains('b'), "chain: {chain}");
        }
        other => panic!("expected ExtendCycle, got {other:?}"),
    }
}

#[test]
fn depends_on_cycle_is_a_graph_error() {
    let dir = project(
        r#"
[tasks.a]
cmd = "true"
depends_on = ["b"]

[tasks.b]
cmd = "true"
depends_on = ["a"]
"#,
        &[],
    );

    let resolved = resolve_project(&dir, None).unwrap();
    let err = TaskGraph::build(&["a".to_string()], &resolved.tasks).unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn env_priority_task_wins_over_all_layers() {
    let dir = project(
        r#"
[project]
env_files = ["global.env"]

[env]
X = "2"

[profiles.p]
env_files = ["profile.env"]
env = { X = "4" }

[tasks.t]
cmd = "true"
env = { X = "5" }

[tasks.untouched]
cmd = "true"
"#,
        &[("global.env", "X=1\n"), ("profile.env", "X=3\n")],
    );

    let resolved = resolve_project(&dir, Some("p")).unwrap();
    assert_eq!(resolved.tasks["t"].env["X"], "5");
    // Without a task override the profile env wins.
    assert_eq!(resolved.tasks["untouched"].env["X"], "4");
}

#[test]
fn env_file_layers_respect_order() {
    let dir = project(
        r#"
[project]
env_files = ["first.env", "second.env"]

[tasks.t]
cmd = "true"
"#,
        &[
            ("first.env", "A=first\nB=first\n"),
            ("second.env", "B=second\n"),
        ],
    );

    let resolved = resolve_project(&dir, None).unwrap();
    let t = &resolved.tasks["t"];
    assert_eq!(t.env["A"], "first");
    assert_eq!(t.env["B"], "second");
}

#[test]
fn global_env_overrides_env_files() {
    let dir = project(
        r#"
[project]
env_files = ["vars.env"]

[env]
X = "from-env-table"

[tasks.t]
cmd = "true"
"#,
        &[("vars.env", "X=from-file\nY=kept\n")],
    );

    let resolved = resolve_project(&dir, None).unwrap();
    let t = &resolved.tasks["t"];
    assert_eq!(t.env["X"], "from-env-table");
    assert_eq!(t.env["Y"], "kept");
}

#[test]
fn missing_env_file_is_reported_with_path() {
    let dir = project(
        r#"
[project]
env_files = ["absent.env"]

[tasks.t]
cmd = "true"
"#,
        &[],
    );

    let err = resolve_project(&dir, None).unwrap_err();
    assert!(matches!(err, ConfigError::FileRead { .. }));
    assert!(err.to_string().contains("absent.env"));
}

#[test]
fn malformed_env_file_reports_line() {
    let dir = project(
        r#"
[project]
env_files = ["bad.env"]

[tasks.t]
cmd = "true"
"#,
        &[("bad.env", "GOOD=1\nthis is not a pair\n")],
    );

    let err = resolve_project(&dir, None).unwrap_err();
    match err {
        ConfigError::EnvFile { line, .. } => assert_eq!(line, 2),
        other => panic!("expected EnvFile error, got {other:?}"),
    }
}

#[test]
fn unknown_config_key_names_the_field() {
    let dir = project(
        r#"
[tasks.t]
cmd = "true"
not_a_field = 1
"#,
        &[],
    );

    let err = resolve_project(&dir, None).unwrap_err();
    assert!(err.to_string().contains("not_a_field"));
}

#[test]
fn discovery_walks_up_and_prefers_pt_toml() {
    let dir = project("[tasks.t]\ncmd = \"true\"\n", &[]);
    let nested = dir.path().join("deep/nested");
    fs::create_dir_all(&nested).unwrap();

    let found = find_config_file_from(&nested).unwrap();
    assert_eq!(found, dir.path().join("pt.toml"));
}

#[test]
fn discovery_accepts_pyproject_tool_table() {
    let dir = tempfile::TempDir::new().unwrap();
    fs::write(
        dir.path().join("pyproject.toml"),
        "[project]\nname = \"x\"\n\n[tool.pt.tasks.lint]\ncmd = \"ruff check .\"\n",
    )
    .unwrap();

    let found = find_config_file_from(dir.path()).unwrap();
    assert_eq!(found, dir.path().join("pyproject.toml"));

    let loaded = pt::config::load_config_file(&found).unwrap();
    assert!(loaded.config.tasks.contains_key("lint"));
}

#[test]
fn default_profile_applies_when_none_selected() {
    let dir = project(
        r#"
[project]
default_profile = "dev"

[profiles.dev]
env = { MODE = "dev" }

[tasks.t]
cmd = "true"
"#,
        &[],
    );

    let resolved = resolve_project(&dir, None).unwrap();
    assert_eq!(resolved.profile.as_deref(), Some("dev"));
    assert_eq!(resolved.tasks["t"].env["MODE"], "dev");
}

#[test]
fn explicit_profile_beats_default() {
    let dir = project(
        r#"
[project]
default_profile = "dev"

[profiles.dev]
env = { MODE = "dev" }

[profiles.ci]
env = { MODE = "ci" }

[tasks.t]
cmd = "true"
"#,
        &[],
    );

    let resolved = resolve_project(&dir, Some("ci")).unwrap();
    assert_eq!(resolved.tasks["t"].env["MODE"], "ci");
}

#[test]
fn group_expansion_uses_profile_overrides() {
    let dir = project(
        r#"
[dependencies]
testing = ["pytest"]

[profiles.ci]
dependencies = { testing = ["pytest", "pytest-xdist"] }

[tasks.test]
cmd = "pytest"
dependencies = ["testing", "rich"]
"#,
        &[],
    );

    let plain = resolve_project(&dir, None).unwrap();
    assert_eq!(plain.tasks["test"].dependencies, vec!["pytest", "rich"]);

    let ci = resolve_project(&dir, Some("ci")).unwrap();
    assert_eq!(
        ci.tasks["test"].dependencies,
        vec!["pytest", "pytest-xdist", "rich"]
    );
}
