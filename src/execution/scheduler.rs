//! Group scheduling: `pt multi` runs and pipeline stages.
//!
//! A group of tasks is dispatched sequentially or concurrently, with
//! configurable failure behavior and output capture. Buffered output is
//! emitted per task in completion order; interleaved output streams live
//! with a task-name prefix.

use crate::config::error::ConfigError;
use crate::config::types::{OnFailure, OutputMode};
use crate::core::graph::TaskGraph;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::process::{wait_cancelled, OutputLine, OutputSink};
use super::runner::{RunReport, RunResult, RunState, Runner, TaskOutcome, TaskStatus};

/// Scheduling parameters for one task group.
#[derive(Debug, Clone, Copy)]
pub struct GroupOptions {
    pub parallel: bool,
    pub on_failure: OnFailure,
    pub output: OutputMode,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            on_failure: OnFailure::FailFast,
            output: OutputMode::Buffered,
        }
    }
}

/// Run a group of tasks (names or aliases) under the given options.
pub async fn run_group(
    runner: &Arc<Runner>,
    names: &[String],
    opts: GroupOptions,
) -> RunResult<RunReport> {
    let mut canonical = Vec::with_capacity(names.len());
    for name in names {
        canonical.push(runner.config.resolve_name(name)?);
    }
    // Validates every target and rejects dependency cycles up front.
    let graph = TaskGraph::build(&canonical, &runner.config.tasks)?;

    // Group-local cancellation, layered over the process-wide signal.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancel_tx = Arc::new(cancel_tx);
    let forwarder = {
        let mut global = runner.cancel_receiver();
        let cancel_tx = Arc::clone(&cancel_tx);
        tokio::spawn(async move {
            wait_cancelled(&mut global).await;
            let _ = cancel_tx.send(true);
        })
    };
    let state = Arc::new(RunState::new(cancel_rx.clone()));

    let (line_tx, printer) = match opts.output {
        OutputMode::Interleaved => {
            let (tx, rx) = mpsc::unbounded_channel::<OutputLine>();
            let width = canonical.iter().map(String::len).max().unwrap_or(0);
            (Some(tx), Some(tokio::spawn(print_interleaved(rx, width))))
        }
        OutputMode::Buffered => (None, None),
    };
    let sinks: Vec<OutputSink> = canonical
        .iter()
        .map(|name| match &line_tx {
            Some(tx) => OutputSink::Prefixed {
                task: name.clone(),
                tx: tx.clone(),
            },
            None => OutputSink::Buffered,
        })
        .collect();
    drop(line_tx);

    let buffered = opts.output == OutputMode::Buffered;
    let mut collected: Vec<TaskOutcome> = Vec::with_capacity(canonical.len());

    if opts.parallel {
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TaskOutcome>();

        for (name, sink) in canonical.iter().cloned().zip(sinks) {
            let runner = Arc::clone(runner);
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                let outcome = if stop.load(Ordering::SeqCst) {
                    TaskOutcome {
                        name: name.clone(),
                        status: TaskStatus::Skipped {
                            reason: "not started (earlier failure)".to_string(),
                        },
                        result: None,
                        duration: Duration::ZERO,
                    }
                } else {
                    runner.run_node(name, state, Vec::new(), sink).await
                };
                let _ = done_tx.send(outcome);
            });
        }
        drop(done_tx);

        while let Some(outcome) = done_rx.recv().await {
            if buffered {
                print_buffered(&outcome);
            }
            if !outcome.success() {
                match opts.on_failure {
                    OnFailure::FailFast => {
                        debug!(task = %outcome.name, "failure under fail-fast; cancelling group");
                        stop.store(true, Ordering::SeqCst);
                        let _ = cancel_tx.send(true);
                    }
                    OnFailure::Wait => {
                        stop.store(true, Ordering::SeqCst);
                    }
                    OnFailure::Continue => {}
                }
            }
            collected.push(outcome);
        }
    } else {
        let mut remaining = canonical.iter().cloned().zip(sinks);
        let mut cancel = cancel_rx.clone();
        for (name, sink) in remaining.by_ref() {
            if *cancel.borrow_and_update() {
                collected.push(TaskOutcome {
                    name,
                    status: TaskStatus::Skipped {
                        reason: "not started (interrupted)".to_string(),
                    },
                    result: None,
                    duration: Duration::ZERO,
                });
                continue;
            }
            let outcome = runner
                .run_node(name, Arc::clone(&state), Vec::new(), sink)
                .await;
            if buffered {
                print_buffered(&outcome);
            }
            let failed = !outcome.success();
            collected.push(outcome);
            if failed && opts.on_failure != OnFailure::Continue {
                break;
            }
        }
        for (name, _sink) in remaining {
            collected.push(TaskOutcome {
                name,
                status: TaskStatus::Skipped {
                    reason: "not started (earlier failure)".to_string(),
                },
                result: None,
                duration: Duration::ZERO,
            });
        }
    }

    if let Some(printer) = printer {
        let _ = printer.await;
    }
    forwarder.abort();

    // Dependency outcomes first, then the named tasks in observed order.
    let mut report = state.report(&graph.topological_order()).await;
    for outcome in collected {
        report.outcomes.insert(outcome.name.clone(), outcome);
    }
    Ok(report)
}

/// Run a named pipeline: stages sequentially, each stage through the group
/// scheduler with the pipeline's options.
pub async fn run_pipeline(runner: &Arc<Runner>, name: &str) -> RunResult<RunReport> {
    let pipeline = runner
        .config
        .pipelines
        .get(name)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownPipeline(name.to_string()))?;

    info!(
        pipeline = name,
        stages = pipeline.stages.len(),
        "running pipeline"
    );

    let mut report = RunReport::default();
    for (idx, stage) in pipeline.stages.iter().enumerate() {
        debug!(
            pipeline = name,
            stage = idx,
            tasks = ?stage.tasks,
            parallel = stage.parallel,
            "running stage"
        );
        let opts = GroupOptions {
            parallel: stage.parallel,
            on_failure: pipeline.on_failure,
            output: pipeline.output,
        };
        let stage_report = run_group(runner, &stage.tasks, opts).await?;
        let stage_failed = !stage_report.success();
        for (task, outcome) in stage_report.outcomes {
            report.outcomes.insert(task, outcome);
        }
        if stage_failed && pipeline.on_failure != OnFailure::Continue {
            warn!(
                pipeline = name,
                stage = idx,
                "stage failed; aborting remaining stages"
            );
            break;
        }
    }

    Ok(report)
}

async fn print_interleaved(mut rx: mpsc::UnboundedReceiver<OutputLine>, width: usize) {
    while let Some(line) = rx.recv().await {
        if line.stderr {
            eprintln!("{:<width$} | {}", line.task, line.line);
        } else {
            println!("{:<width$} | {}", line.task, line.line);
        }
    }
}

/// Emit a task's captured output contiguously.
fn print_buffered(outcome: &TaskOutcome) {
    if let Some(result) = &outcome.result {
        if !result.stdout.is_empty() {
            print!("{}", result.stdout);
        }
        if !result.stderr.is_empty() {
            eprint!("{}", result.stderr);
        }
    }
}
