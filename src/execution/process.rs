//! Subprocess supervision.
//!
//! Runs a single invocation with piped output, streaming lines to the
//! selected sink while collecting them for the result. Timeouts and
//! cancellation terminate the child's process group (SIGTERM, a short grace
//! period, then SIGKILL) and are reported with the designated exit codes
//! 124 and 130.

use super::invocation::Invocation;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};

/// Grace period between SIGTERM and SIGKILL.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// Exit code reported for a timed-out task.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported for a cancelled task.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// A line of output from a supervised subprocess.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub task: String,
    pub line: String,
    pub stderr: bool,
}

/// Where a subprocess's output goes while it runs. Output is collected into
/// the [`ExecutionResult`] in every mode.
#[derive(Debug, Clone)]
pub enum OutputSink {
    /// Echo lines to this process's stdout/stderr unchanged.
    Passthrough,

    /// Collect only; the caller emits the captured output later.
    Buffered,

    /// Send lines to a channel for task-prefixed interleaving.
    Prefixed {
        task: String,
        tx: mpsc::UnboundedSender<OutputLine>,
    },
}

/// Result of one subprocess run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.return_code == 0
    }

    /// The last `max_lines` lines of stderr, for condensed failure reports.
    pub fn stderr_tail(&self, max_lines: usize) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }

    fn synthetic(return_code: i32, stderr: String) -> Self {
        Self {
            return_code,
            stderr,
            ..Self::default()
        }
    }
}

enum Waited {
    Exited(std::process::ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut,
    Cancelled,
}

/// Run an invocation to completion.
///
/// Spawn failures are folded into the result: 127 for a missing program
/// (matching the shell convention), 1 otherwise.
pub async fn run_invocation(
    inv: &Invocation,
    sink: &OutputSink,
    cancel: &watch::Receiver<bool>,
) -> ExecutionResult {
    let mut command = Command::new(&inv.program);
    command
        .args(&inv.args)
        .current_dir(&inv.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command.env_clear();
    for (key, value) in inv.env.iter() {
        command.env(key, value);
    }
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return ExecutionResult::synthetic(
                127,
                format!("command not found: {}", inv.program),
            );
        }
        Err(e) => {
            return ExecutionResult::synthetic(1, format!("failed to execute command: {e}"));
        }
    };

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return ExecutionResult::synthetic(1, "failed to open subprocess pipes".to_string());
    };
    let out_task = tokio::spawn(pump(stdout, sink.clone(), false));
    let err_task = tokio::spawn(pump(stderr, sink.clone(), true));

    let mut cancel = cancel.clone();
    let waited = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Waited::Exited(status),
            Err(e) => Waited::WaitFailed(e),
        },
        _ = sleep_opt(inv.timeout) => Waited::TimedOut,
        _ = wait_cancelled(&mut cancel) => Waited::Cancelled,
    };

    let (return_code, timed_out, cancelled) = match waited {
        Waited::Exited(status) => (status.code().unwrap_or(-1), false, false),
        Waited::WaitFailed(e) => {
            terminate(&mut child).await;
            return ExecutionResult::synthetic(1, format!("failed to await subprocess: {e}"));
        }
        Waited::TimedOut => {
            terminate(&mut child).await;
            (TIMEOUT_EXIT_CODE, true, false)
        }
        Waited::Cancelled => {
            terminate(&mut child).await;
            (INTERRUPT_EXIT_CODE, false, true)
        }
    };

    // Readers finish at EOF once the child is gone, keeping whatever output
    // arrived before a timeout or cancellation.
    let stdout = out_task.await.unwrap_or_default();
    let mut stderr = err_task.await.unwrap_or_default();
    if timed_out {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        let seconds = inv.timeout.map(|d| d.as_secs()).unwrap_or_default();
        stderr.push_str(&format!("command timed out after {seconds} seconds\n"));
    }

    ExecutionResult {
        return_code,
        stdout,
        stderr,
        timed_out,
        cancelled,
    }
}

/// Resolve when the cancel flag turns true; never resolves if the sender is
/// dropped without cancelling.
pub async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn sleep_opt(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn pump<R>(reader: R, sink: OutputSink, stderr: bool) -> String
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(reader).lines();
    let mut collected = String::new();
    while let Ok(Some(line)) = lines.next_line().await {
        collected.push_str(&line);
        collected.push('\n');
        match &sink {
            OutputSink::Passthrough => {
                if stderr {
                    eprintln!("{line}");
                } else {
                    println!("{line}");
                }
            }
            OutputSink::Prefixed { task, tx } => {
                let _ = tx.send(OutputLine {
                    task: task.clone(),
                    line,
                    stderr,
                });
            }
            OutputSink::Buffered => {}
        }
    }
    collected
}

/// Terminate the child's process group: SIGTERM, grace period, SIGKILL.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = Command::new("kill")
            .args(["-TERM", "--"])
            .arg(format!("-{pid}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::environment::Environment;
    use std::path::PathBuf;
    use std::time::Instant;

    fn bash(cmd: &str) -> Invocation {
        Invocation {
            program: "bash".to_string(),
            args: vec!["-c".to_string(), cmd.to_string()],
            env: Environment::from_process(),
            cwd: PathBuf::from("."),
            timeout: None,
        }
    }

    fn never_cancel() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive for the duration of the test process.
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let inv = bash("echo out; echo err >&2");
        let result = run_invocation(&inv, &OutputSink::Buffered, &never_cancel()).await;

        assert!(result.success());
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[tokio::test]
    async fn reports_exit_code() {
        let inv = bash("exit 42");
        let result = run_invocation(&inv, &OutputSink::Buffered, &never_cancel()).await;

        assert!(!result.success());
        assert_eq!(result.return_code, 42);
    }

    #[tokio::test]
    async fn missing_program_maps_to_127() {
        let inv = Invocation {
            program: "pt-no-such-program".to_string(),
            args: vec![],
            env: Environment::from_process(),
            cwd: PathBuf::from("."),
            timeout: None,
        };
        let result = run_invocation(&inv, &OutputSink::Buffered, &never_cancel()).await;

        assert_eq!(result.return_code, 127);
        assert!(result.stderr.contains("not found"));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_124() {
        let mut inv = bash("echo early; sleep 30");
        inv.timeout = Some(Duration::from_millis(300));

        let start = Instant::now();
        let result = run_invocation(&inv, &OutputSink::Buffered, &never_cancel()).await;

        assert_eq!(result.return_code, TIMEOUT_EXIT_CODE);
        assert!(result.timed_out);
        // Output produced before the deadline is retained.
        assert_eq!(result.stdout, "early\n");
        assert!(result.stderr.contains("timed out"));
        // Far less than the sleep duration.
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancellation_reports_130() {
        let (tx, rx) = watch::channel(false);
        let inv = bash("sleep 30");

        let handle = tokio::spawn(async move {
            run_invocation(&inv, &OutputSink::Buffered, &rx).await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert_eq!(result.return_code, INTERRUPT_EXIT_CODE);
        assert!(result.cancelled);
    }

    #[tokio::test]
    async fn child_receives_invocation_env() {
        let mut inv = bash("echo -n $PT_PROC_TEST");
        inv.env.set("PT_PROC_TEST", "value-123");

        let result = run_invocation(&inv, &OutputSink::Buffered, &never_cancel()).await;
        assert_eq!(result.stdout, "value-123");
    }

    #[tokio::test]
    async fn prefixed_sink_forwards_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let inv = bash("echo one; echo two");
        let sink = OutputSink::Prefixed {
            task: "demo".to_string(),
            tx,
        };

        let result = run_invocation(&inv, &sink, &never_cancel()).await;
        assert!(result.success());

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.task == "demo"));
        assert_eq!(lines[0].line, "one");
        assert_eq!(lines[1].line, "two");
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let result = ExecutionResult {
            stderr: "a\nb\nc\nd\n".to_string(),
            ..ExecutionResult::default()
        };
        assert_eq!(result.stderr_tail(2), "c\nd");
        assert_eq!(result.stderr_tail(10), "a\nb\nc\nd");
    }
}
