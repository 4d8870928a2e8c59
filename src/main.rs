//! pt - a declarative task runner for Python projects, powered by uv.

use clap::{Parser, Subcommand};
use pt::config::{load_config, resolve, ConfigError, OnFailure, OutputMode};
use pt::core::TaskGraph;
use pt::execution::{
    check_uv_installed, run_group, run_pipeline, GroupOptions, RunError, RunReport, Runner,
};
use pt::watch::{watch_and_run, WatchConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// pt - a declarative task runner for Python projects, powered by uv.
#[derive(Parser)]
#[command(name = "pt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task defined in pt.toml
    Run {
        /// Task name or alias
        task: String,

        /// Extra arguments passed to the task
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Profile to use (dev, ci, prod, ...)
        #[arg(short, long)]
        profile: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run a Python script with the project context
    Exec {
        /// Path to the script
        script: PathBuf,

        /// Extra arguments passed to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Profile to use
        #[arg(short, long)]
        profile: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run multiple tasks
    Multi {
        /// Task names (ignored when --tag or --category is given)
        tasks: Vec<String>,

        /// Select tasks carrying these tags (repeatable; ALL tags by default)
        #[arg(short, long)]
        tag: Vec<String>,

        /// Match ANY given tag instead of ALL
        #[arg(long)]
        match_any: bool,

        /// Select all tasks in a category
        #[arg(long)]
        category: Option<String>,

        /// Run tasks in parallel
        #[arg(long)]
        parallel: bool,

        /// Run tasks sequentially (default)
        #[arg(short, long)]
        sequential: bool,

        /// Behavior when a task fails
        #[arg(long, value_enum, default_value_t = OnFailure::FailFast)]
        on_failure: OnFailure,

        /// Output mode
        #[arg(long, value_enum, default_value_t = OutputMode::Buffered)]
        output: OutputMode,

        /// Profile to use
        #[arg(short, long)]
        profile: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run a pipeline defined in pt.toml
    Pipeline {
        /// Pipeline name
        name: String,

        /// Profile to use
        #[arg(short, long)]
        profile: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Watch for file changes and re-run a task
    Watch {
        /// Task name or alias
        task: String,

        /// Extra arguments passed to the task
        args: Vec<String>,

        /// File patterns to watch (default: **/*.py)
        #[arg(long)]
        pattern: Vec<String>,

        /// Patterns to ignore
        #[arg(short, long)]
        ignore: Vec<String>,

        /// Debounce time in seconds
        #[arg(long, default_value_t = 0.5)]
        debounce: f64,

        /// Don't clear the screen between runs
        #[arg(long)]
        no_clear: bool,

        /// Profile to use
        #[arg(short, long)]
        profile: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List available tasks and pipelines
    List {
        /// Show private tasks (names starting with _)
        #[arg(short, long)]
        all: bool,

        /// Show descriptions, dependencies, and tags
        #[arg(short, long)]
        verbose: bool,

        /// Filter tasks by tag (repeatable)
        #[arg(short, long)]
        tag: Vec<String>,

        /// Match ANY given tag instead of ALL
        #[arg(long)]
        match_any: bool,

        /// Filter tasks by category
        #[arg(long)]
        category: Option<String>,

        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List all tags used in tasks
    Tags {
        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate the configuration file
    Check {
        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Create a starter pt.toml
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = run_cli(cli).await;
    std::process::exit(code);
}

async fn run_cli(cli: Cli) -> i32 {
    match cli.command {
        Commands::Run {
            task,
            args,
            profile,
            verbose,
            config,
        } => {
            init_logging(verbose);
            if !ensure_uv() {
                return 1;
            }
            let cancel = spawn_signal_handler();
            let runner = match make_runner(config, profile, cancel.clone()) {
                Ok(runner) => runner,
                Err(e) => return report_config_error(&e),
            };
            match runner.run_task(&task, &args).await {
                Ok(report) => exit_code(&report, &cancel),
                Err(e) => report_run_error(&e),
            }
        }

        Commands::Exec {
            script,
            args,
            profile,
            verbose,
            config,
        } => {
            init_logging(verbose);
            if !ensure_uv() {
                return 1;
            }
            if !script.exists() {
                eprintln!("error: script '{}' does not exist", script.display());
                return 1;
            }
            let cancel = spawn_signal_handler();
            let runner = match make_runner(config, profile, cancel.clone()) {
                Ok(runner) => runner,
                Err(e) => return report_config_error(&e),
            };
            match runner.run_script(&script, &args).await {
                Ok(result) => {
                    if *cancel.borrow() {
                        130
                    } else {
                        result.return_code
                    }
                }
                Err(e) => report_config_error(&e),
            }
        }

        Commands::Multi {
            tasks,
            tag,
            match_any,
            category,
            parallel,
            sequential,
            on_failure,
            output,
            profile,
            verbose,
            config,
        } => {
            init_logging(verbose);
            if !ensure_uv() {
                return 1;
            }
            let cancel = spawn_signal_handler();
            let runner = match make_runner(config, profile, cancel.clone()) {
                Ok(runner) => runner,
                Err(e) => return report_config_error(&e),
            };

            let names = if let Some(category) = &category {
                if !tasks.is_empty() {
                    warn!("task names are ignored when using --category");
                }
                let selected = runner.config.tasks_by_category(category);
                if selected.is_empty() {
                    println!("no tasks found in category '{category}'");
                    return 0;
                }
                selected
            } else if !tag.is_empty() {
                if !tasks.is_empty() {
                    warn!("task names are ignored when using --tag");
                }
                let selected = runner.config.tasks_by_tags(&tag, !match_any);
                if selected.is_empty() {
                    println!("no tasks found with tag(s): {}", tag.join(", "));
                    return 0;
                }
                selected
            } else if !tasks.is_empty() {
                tasks
            } else {
                eprintln!("error: specify task names, or use --tag / --category");
                return 2;
            };

            let opts = GroupOptions {
                parallel: parallel && !sequential,
                on_failure,
                output,
            };
            match run_group(&runner, &names, opts).await {
                Ok(report) => {
                    print_summary(&report);
                    if *cancel.borrow() {
                        130
                    } else if report.success() {
                        0
                    } else {
                        1
                    }
                }
                Err(e) => report_run_error(&e),
            }
        }

        Commands::Pipeline {
            name,
            profile,
            verbose,
            config,
        } => {
            init_logging(verbose);
            if !ensure_uv() {
                return 1;
            }
            let cancel = spawn_signal_handler();
            let runner = match make_runner(config, profile, cancel.clone()) {
                Ok(runner) => runner,
                Err(e) => return report_config_error(&e),
            };
            match run_pipeline(&runner, &name).await {
                Ok(report) => {
                    print_summary(&report);
                    if *cancel.borrow() {
                        130
                    } else if report.success() {
                        0
                    } else {
                        1
                    }
                }
                Err(e) => report_run_error(&e),
            }
        }

        Commands::Watch {
            task,
            args,
            pattern,
            ignore,
            debounce,
            no_clear,
            profile,
            verbose,
            config,
        } => {
            init_logging(verbose);
            if !ensure_uv() {
                return 1;
            }
            let cancel = spawn_signal_handler();
            let runner = match make_runner(config, profile, cancel.clone()) {
                Ok(runner) => runner,
                Err(e) => return report_config_error(&e),
            };

            let defaults = WatchConfig::default();
            let watch_config = WatchConfig {
                patterns: if pattern.is_empty() {
                    defaults.patterns.clone()
                } else {
                    pattern
                },
                ignore: if ignore.is_empty() {
                    defaults.ignore.clone()
                } else {
                    ignore
                },
                debounce: Duration::from_secs_f64(debounce),
                clear_screen: !no_clear,
            };

            match watch_and_run(runner, &task, &args, watch_config).await {
                Ok(()) => {
                    if *cancel.borrow() {
                        130
                    } else {
                        0
                    }
                }
                Err(e) => report_run_error(&e),
            }
        }

        Commands::List {
            all,
            verbose,
            tag,
            match_any,
            category,
            config,
        } => {
            init_logging(false);
            match load_and_resolve(config) {
                Ok(resolved) => {
                    list_tasks(&resolved, all, verbose, &tag, match_any, category.as_deref());
                    0
                }
                Err(e) => report_config_error(&e),
            }
        }

        Commands::Tags { config } => {
            init_logging(false);
            match load_and_resolve(config) {
                Ok(resolved) => {
                    let tags = resolved.all_tags();
                    if tags.is_empty() {
                        println!("no tags defined");
                        return 0;
                    }
                    println!("Tags:");
                    for (tag, tasks) in tags {
                        println!("  {:<20} {:>3}  {}", tag, tasks.len(), tasks.join(", "));
                    }
                    0
                }
                Err(e) => report_config_error(&e),
            }
        }

        Commands::Check { config } => {
            init_logging(false);
            check_config(config)
        }

        Commands::Init { force } => {
            init_logging(false);
            init_config(force)
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .init();
}

/// Process-wide cancel signal: first ctrl-c cancels gracefully, a second
/// one exits immediately with 130.
fn spawn_signal_handler() -> tokio::sync::watch::Receiver<bool> {
    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping tasks");
            let _ = tx.send(true);
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
    rx
}

fn make_runner(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    cancel: tokio::sync::watch::Receiver<bool>,
) -> Result<Arc<Runner>, ConfigError> {
    let loaded = load_config(config_path.as_deref())?;
    let resolved = resolve(&loaded, profile.as_deref())?;
    Ok(Arc::new(Runner::new(Arc::new(resolved), cancel)))
}

fn load_and_resolve(
    config_path: Option<PathBuf>,
) -> Result<pt::config::ResolvedConfig, ConfigError> {
    let loaded = load_config(config_path.as_deref())?;
    resolve(&loaded, None)
}

fn ensure_uv() -> bool {
    if check_uv_installed() {
        return true;
    }
    eprintln!("error: uv is not installed");
    eprintln!();
    eprintln!("Install uv:");
    eprintln!("  Linux/macOS: curl -LsSf https://astral.sh/uv/install.sh | sh");
    eprintln!("  Windows:     powershell -c \"irm https://astral.sh/uv/install.ps1 | iex\"");
    eprintln!("  pip:         pip install uv");
    false
}

fn report_config_error(e: &ConfigError) -> i32 {
    eprintln!("error: {e}");
    if matches!(e, ConfigError::NotFound { .. }) {
        eprintln!("hint: run 'pt init' to create a configuration file");
    }
    1
}

fn report_run_error(e: &RunError) -> i32 {
    eprintln!("error: {e}");
    1
}

fn exit_code(report: &RunReport, cancel: &tokio::sync::watch::Receiver<bool>) -> i32 {
    if *cancel.borrow() {
        130
    } else {
        report.exit_code()
    }
}

fn print_summary(report: &RunReport) {
    if report.outcomes.is_empty() {
        return;
    }
    println!();
    for (name, outcome) in &report.outcomes {
        println!("  {:<24} {}", name, outcome.status.label());
    }
}

fn list_tasks(
    resolved: &pt::config::ResolvedConfig,
    all: bool,
    verbose: bool,
    tags: &[String],
    match_any: bool,
    category: Option<&str>,
) {
    let selected: Vec<String> = if let Some(category) = category {
        resolved.tasks_by_category(category)
    } else if !tags.is_empty() {
        resolved.tasks_by_tags(tags, !match_any)
    } else {
        resolved.tasks.keys().cloned().collect()
    };

    let mut names: Vec<&String> = selected
        .iter()
        .filter(|name| {
            resolved
                .tasks
                .get(name.as_str())
                .is_some_and(|t| all || !t.private)
        })
        .collect();
    names.sort();

    if !names.is_empty() {
        println!("Tasks:");
        for name in &names {
            let task = &resolved.tasks[name.as_str()];
            if verbose {
                println!("  {name}");
                if !task.aliases.is_empty() {
                    println!("    aliases:     {}", task.aliases.join(", "));
                }
                if let Some(description) = &task.description {
                    println!("    description: {description}");
                }
                if let Some(category) = &task.category {
                    println!("    category:    {category}");
                }
                println!("    kind:        {}", task.kind.label());
                if !task.depends_on.is_empty() {
                    println!("    depends on:  {}", task.depends_on.join(", "));
                }
                if !task.tags.is_empty() {
                    println!("    tags:        {}", task.tags.join(", "));
                }
            } else {
                let display = if task.aliases.is_empty() {
                    (*name).clone()
                } else {
                    format!("{name} ({})", task.aliases.join(", "))
                };
                match &task.description {
                    Some(description) => println!("  {display:<28} {description}"),
                    None => println!("  {display}"),
                }
            }
        }
    }

    if !resolved.pipelines.is_empty() {
        if !names.is_empty() {
            println!();
        }
        println!("Pipelines:");
        let mut pipeline_names: Vec<&String> = resolved.pipelines.keys().collect();
        pipeline_names.sort();
        for name in pipeline_names {
            let pipeline = &resolved.pipelines[name.as_str()];
            if verbose {
                let stages: Vec<String> = pipeline
                    .stages
                    .iter()
                    .map(|stage| {
                        format!(
                            "[{}]{}",
                            stage.tasks.join(", "),
                            if stage.parallel { "*" } else { "" }
                        )
                    })
                    .collect();
                println!("  {name}");
                if let Some(description) = &pipeline.description {
                    println!("    description: {description}");
                }
                println!("    stages:      {}", stages.join(" -> "));
            } else {
                match &pipeline.description {
                    Some(description) => println!("  {name:<28} {description}"),
                    None => println!("  {name}"),
                }
            }
        }
    }

    if names.is_empty() && resolved.pipelines.is_empty() {
        println!("no tasks or pipelines defined");
    }
}

fn check_config(config_path: Option<PathBuf>) -> i32 {
    let loaded = match load_config(config_path.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => return report_config_error(&e),
    };
    let resolved = match resolve(&loaded, None) {
        Ok(resolved) => resolved,
        Err(e) => return report_config_error(&e),
    };

    // Surface dependency cycles even for tasks nobody has run yet.
    let all_names: Vec<String> = resolved.tasks.keys().cloned().collect();
    if let Err(e) = TaskGraph::build(&all_names, &resolved.tasks) {
        eprintln!("error: {e}");
        return 1;
    }

    println!("configuration valid: {}", loaded.path.display());
    println!(
        "  project:           {}",
        resolved.project.name.as_deref().unwrap_or("(unnamed)")
    );
    println!("  tasks:             {}", resolved.tasks.len());
    println!("  pipelines:         {}", resolved.pipelines.len());
    println!("  dependency groups: {}", resolved.dependency_groups.len());

    if check_uv_installed() {
        println!("uv is installed");
    } else {
        println!("warning: uv is not installed");
    }
    0
}

const CONFIG_TEMPLATE: &str = r#"# pt configuration
# Tasks, profiles, and pipelines for this project.

[project]
name = ""
# python = "3.12"           # default interpreter version
# default_profile = "dev"   # profile used when none is selected
# on_error_task = "notify"  # task invoked when any task fails
# env_files = [".env"]      # KEY=VALUE files loaded for every task

[env]
# Environment variables applied to every task.
# LOG_LEVEL = "info"

[dependencies]
# Named dependency groups, referenced from task dependency lists.
# testing = ["pytest", "pytest-cov"]
# linting = ["ruff", "mypy"]

# [tasks.lint]
# description = "Run linting"
# cmd = "ruff check src/"
# dependencies = ["linting"]
# aliases = ["l"]

# [tasks.test]
# description = "Run the test suite"
# cmd = "pytest"
# dependencies = ["testing"]
# pythonpath = ["src", "tests"]
# env = { DEBUG = "1" }
# timeout = 300

# [tasks.test-verbose]
# extend = "test"            # inherit everything from the test task
# description = "Tests with verbose output"
# args = ["-v"]

# [tasks.report]
# description = "Generate a report"
# script = "scripts/report.py"   # scripts may carry inline metadata
# condition = { platforms = ["linux"], env_set = ["CI"] }

# [tasks.checks]
# description = "Lint and test together"
# cmd = "echo all checks passed"
# depends_on = ["lint", "test"]
# parallel = true

# [tasks._setup]
# description = "Internal setup (hidden from pt list)"
# cmd = "echo setting up"

# [profiles.dev]
# env = { DEBUG = "1", LOG_LEVEL = "debug" }
# env_files = [".env.dev"]

# [profiles.ci]
# env = { CI = "1" }
# python = "3.11"

# [pipelines.ci]
# description = "Lint, then test"
# on_failure = "fail-fast"   # or "wait", "continue"
# output = "buffered"        # or "interleaved"
# stages = [
#     { tasks = ["lint"], parallel = false },
#     { tasks = ["test"] },
# ]
"#;

fn init_config(force: bool) -> i32 {
    let path = match std::env::current_dir() {
        Ok(cwd) => cwd.join("pt.toml"),
        Err(e) => {
            eprintln!("error: cannot determine current directory: {e}");
            return 1;
        }
    };

    if path.exists() && !force {
        eprintln!("config file already exists: {}", path.display());
        eprintln!("use --force to overwrite");
        return 1;
    }

    if let Err(e) = std::fs::write(&path, CONFIG_TEMPLATE) {
        eprintln!("error: failed to write {}: {e}", path.display());
        return 1;
    }

    println!("created {}", path.display());
    println!();
    println!("edit the file to add tasks, then run:");
    println!("  pt list        # list available tasks");
    println!("  pt run <task>  # run a task");
    0
}
