//! Isolated script execution host.
//!
//! Each run spawns a fresh interpreter process; nothing is reused across
//! runs, so no variables, imported modules, or policy changes can leak
//! between unrelated scripts. The interpreter's trust level is scoped to
//! the spawned process through its command-line arguments, never changed
//! system-wide.
//!
//! One host instance serializes runs: a single live session slot behind a
//! mutex. A second `execute` while one is active is rejected with
//! [`HostError::Busy`] — queueing is a caller decision. `execute` blocks
//! the calling thread until the run finishes; callers that must stay
//! responsive run it on a worker (the launcher uses a blocking task).
//! Output callbacks arrive on reader threads with no delivery-thread
//! guarantee.

mod stream;

pub use stream::{classify_line, LineSink, ProgressSink, StreamLine};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::io::BufReader;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::InterpreterConfig;

/// How often the wait loop polls for exit and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Message distinguishing an operator cancellation from a script failure.
const CANCELLED_MESSAGE: &str = "execution cancelled by operator";

/// Caller contract violations and unrecoverable host faults.
#[derive(Debug, Error)]
pub enum HostError {
    /// A run is already active on this host instance. Overlapping runs are
    /// a caller error; retry after the active run completes.
    #[error("a script is already running on this host")]
    Busy,
}

/// One script invocation: the resolved script path, named parameters, and
/// the caller's sinks. Not retained after the call returns.
pub struct ExecutionRequest {
    pub script_path: PathBuf,
    pub parameters: Vec<(String, String)>,
    pub output_sink: Option<LineSink>,
    pub error_sink: Option<LineSink>,
    pub progress_sink: Option<ProgressSink>,
}

impl ExecutionRequest {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
            parameters: Vec::new(),
            output_sink: None,
            error_sink: None,
            progress_sink: None,
        }
    }

    /// Adds a named parameter, passed to the script as `-Name value`.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn on_output<F: Fn(&str) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.output_sink = Some(Arc::new(f));
        self
    }

    pub fn on_error<F: Fn(&str) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.error_sink = Some(Arc::new(f));
        self
    }

    pub fn on_progress<F: Fn(u8) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.progress_sink = Some(Arc::new(f));
        self
    }
}

/// Final verdict of one run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// True only on a clean exit with an empty error channel
    pub success: bool,
    /// Process exit code; `None` when the interpreter died without one
    pub exit_code: Option<i32>,
    /// Accumulated output text (output, warning, and verbose channels)
    pub output: String,
    /// Accumulated error-channel text
    pub error_output: String,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Completion timestamp
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    fn failed(message: String, duration: Duration) -> Self {
        Self {
            success: false,
            exit_code: None,
            output: String::new(),
            error_output: message,
            duration,
            completed_at: Utc::now(),
        }
    }
}

/// Live state of an in-flight run. Exactly one exists per host at a time;
/// torn down unconditionally when the run completes, fails, or is
/// cancelled.
struct RunSession {
    child: Arc<Mutex<Child>>,
    cancel: Arc<AtomicBool>,
}

/// Runs one script to completion (or cancellation) per call, reusable for
/// sequential runs.
pub struct ExecutionHost {
    interpreter: InterpreterConfig,
    session: Mutex<Option<RunSession>>,
    sessions_spawned: AtomicU64,
}

impl ExecutionHost {
    pub fn new(interpreter: InterpreterConfig) -> Self {
        Self {
            interpreter,
            session: Mutex::new(None),
            sessions_spawned: AtomicU64::new(0),
        }
    }

    /// Number of interpreter processes spawned over this host's lifetime.
    pub fn sessions_spawned(&self) -> u64 {
        self.sessions_spawned.load(Ordering::Relaxed)
    }

    /// Executes the request and blocks until the script completes, fails,
    /// or is cancelled via [`stop`](Self::stop) from another thread.
    ///
    /// Script-level problems (missing file, spawn fault, runtime errors)
    /// are captured into the returned [`ExecutionResult`], never raised;
    /// the only error is [`HostError::Busy`].
    pub fn execute(&self, request: ExecutionRequest) -> std::result::Result<ExecutionResult, HostError> {
        let started = Instant::now();

        // Missing script: report immediately, no session is created
        if !request.script_path.is_file() {
            let message = format!("script not found: {}", request.script_path.display());
            if let Some(sink) = &request.error_sink {
                sink(&message);
            }
            return Ok(ExecutionResult::failed(message, started.elapsed()));
        }

        let program = match self.resolve_interpreter() {
            Ok(program) => program,
            Err(e) => {
                let message = format!("{e:#}");
                if let Some(sink) = &request.error_sink {
                    sink(&message);
                }
                return Ok(ExecutionResult::failed(message, started.elapsed()));
            }
        };

        // Spawn while holding the session slot so overlapping calls cannot
        // both pass the idle check.
        let (child, cancel, stdout, stderr) = {
            let mut slot = lock_unpoisoned(&self.session);
            if slot.is_some() {
                return Err(HostError::Busy);
            }

            let mut cmd = Command::new(&program);
            cmd.args(&self.interpreter.args);
            cmd.arg(&request.script_path);
            for (name, value) in &request.parameters {
                cmd.arg(format!("-{name}"));
                cmd.arg(value);
            }
            cmd.stdin(Stdio::null());
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());

            debug!(
                operation = "host.execute",
                script = %request.script_path.display(),
                interpreter = %program.display(),
                "spawning interpreter session"
            );

            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    let message =
                        format!("failed to start interpreter {}: {e}", program.display());
                    if let Some(sink) = &request.error_sink {
                        sink(&message);
                    }
                    return Ok(ExecutionResult::failed(message, started.elapsed()));
                }
            };
            self.sessions_spawned.fetch_add(1, Ordering::Relaxed);

            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let child = Arc::new(Mutex::new(child));
            let cancel = Arc::new(AtomicBool::new(false));

            *slot = Some(RunSession {
                child: Arc::clone(&child),
                cancel: Arc::clone(&cancel),
            });

            (child, cancel, stdout, stderr)
        };

        let output_lines = Arc::new(Mutex::new(Vec::new()));
        let error_lines = Arc::new(Mutex::new(Vec::new()));

        let mut readers = Vec::new();
        if let Some(stdout) = stdout {
            let sink = request.output_sink.clone();
            let progress = request.progress_sink.clone();
            let accumulated = Arc::clone(&output_lines);
            readers.push(thread::spawn(move || {
                stream::drain_stdout(BufReader::new(stdout), sink, progress, accumulated);
            }));
        }
        if let Some(stderr) = stderr {
            let sink = request.error_sink.clone();
            let accumulated = Arc::clone(&error_lines);
            readers.push(thread::spawn(move || {
                stream::drain_stderr(BufReader::new(stderr), sink, accumulated);
            }));
        }

        // Poll for exit or cancellation; cancellation kills the child and
        // the loop then reaps it like any other exit.
        let mut cancelled = false;
        let exit_status: Option<ExitStatus> = loop {
            if cancel.load(Ordering::SeqCst) && !cancelled {
                cancelled = true;
                let _ = lock_unpoisoned(&child).kill();
            }

            match lock_unpoisoned(&child).try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(_) => break None,
            }
            thread::sleep(POLL_INTERVAL);
        };

        // Pipes close once the child exits, so the readers drain and finish
        for reader in readers {
            let _ = reader.join();
        }

        // Tear down the session before returning, whatever the outcome
        lock_unpoisoned(&self.session).take();

        let output_lines = lock_unpoisoned(&output_lines).clone();
        let mut error_lines = lock_unpoisoned(&error_lines).clone();

        let exit_code = exit_status.and_then(|s| s.code());
        // Error-channel entries override a clean exit code; an unavailable
        // exit code falls back to the error-channel signal alone.
        let clean_exit = exit_code.map_or(true, |code| code == 0);
        let success = !cancelled && clean_exit && error_lines.is_empty();

        if cancelled {
            if let Some(sink) = &request.error_sink {
                sink(CANCELLED_MESSAGE);
            }
            error_lines.push(CANCELLED_MESSAGE.to_string());
        }

        let result = ExecutionResult {
            success,
            exit_code,
            output: output_lines.join("\n"),
            error_output: error_lines.join("\n"),
            duration: started.elapsed(),
            completed_at: Utc::now(),
        };

        info!(
            operation = "host.execute",
            script = %request.script_path.display(),
            status = if cancelled {
                "cancelled"
            } else if result.success {
                "success"
            } else {
                "failed"
            },
            exit_code = ?result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "interpreter session finished"
        );

        Ok(result)
    }

    /// Requests cooperative cancellation of the in-flight run, if any.
    ///
    /// Signals the session's cancel flag and kills the live interpreter.
    /// This races with natural completion; whichever is observed first
    /// wins, and calling `stop` after the run finished is a no-op.
    pub fn stop(&self) {
        let slot = lock_unpoisoned(&self.session);
        if let Some(session) = slot.as_ref() {
            session.cancel.store(true, Ordering::SeqCst);
            let _ = lock_unpoisoned(&session.child).kill();
            info!(operation = "host.stop", "cancellation requested");
        }
    }

    /// Resolves the configured interpreter binary, trying the modern
    /// program first and the legacy fallback second.
    fn resolve_interpreter(&self) -> Result<PathBuf> {
        match which::which(&self.interpreter.program) {
            Ok(path) => Ok(path),
            Err(primary) => match &self.interpreter.fallback {
                Some(fallback) => which::which(fallback).with_context(|| {
                    format!(
                        "no interpreter available: {} ({primary}), {fallback} not found either",
                        self.interpreter.program
                    )
                }),
                None => Err(primary).with_context(|| {
                    format!("interpreter not found: {}", self.interpreter.program)
                }),
            },
        }
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn shell_host() -> ExecutionHost {
        ExecutionHost::new(InterpreterConfig {
            program: "sh".to_string(),
            fallback: None,
            args: vec![],
            version_args: vec![],
        })
    }

    fn write_script(temp: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = temp.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    #[cfg(unix)]
    fn test_successful_run_captures_output() {
        let temp = TempDir::new().unwrap();
        let script = write_script(&temp, "ok.sh", "echo hello\necho world\n");

        let host = shell_host();
        let result = host.execute(ExecutionRequest::new(script)).unwrap();

        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.output, "hello\nworld");
        assert!(result.error_output.is_empty());
        assert_eq!(host.sessions_spawned(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_named_parameters_reach_the_script() {
        let temp = TempDir::new().unwrap();
        let script = write_script(&temp, "args.sh", "echo \"$1 $2\"\n");

        let host = shell_host();
        let request = ExecutionRequest::new(script).parameter("StoreId", "042");
        let result = host.execute(request).unwrap();

        assert!(result.success);
        assert_eq!(result.output, "-StoreId 042");
    }

    #[test]
    #[cfg(unix)]
    fn test_error_channel_overrides_clean_exit() {
        let temp = TempDir::new().unwrap();
        let script = write_script(&temp, "warnless.sh", "echo fine\necho oops 1>&2\nexit 0\n");

        let host = shell_host();
        let result = host.execute(ExecutionRequest::new(script)).unwrap();

        // Exit code was zero, but the error channel was not empty
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.error_output, "oops");
        assert_eq!(result.output, "fine");
    }

    #[test]
    #[cfg(unix)]
    fn test_nonzero_exit_fails() {
        let temp = TempDir::new().unwrap();
        let script = write_script(&temp, "bad.sh", "exit 3\n");

        let host = shell_host();
        let result = host.execute(ExecutionRequest::new(script)).unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
    }

    #[test]
    fn test_missing_script_spawns_nothing() {
        let host = shell_host();
        let (tx, rx) = mpsc::channel();

        let request = ExecutionRequest::new("/nonexistent/tool.sh").on_error(move |line: &str| {
            let _ = tx.send(line.to_string());
        });
        let result = host.execute(request).unwrap();

        assert!(!result.success);
        assert!(result.error_output.contains("script not found"));
        assert_eq!(host.sessions_spawned(), 0);
        assert!(rx.try_recv().unwrap().contains("script not found"));
    }

    #[test]
    #[cfg(unix)]
    fn test_stream_classification_and_sinks() {
        let temp = TempDir::new().unwrap();
        let script = write_script(
            &temp,
            "streams.sh",
            "echo starting\n\
             echo 'WARNING: till 3 offline'\n\
             echo 'VERBOSE: opening database'\n\
             echo 'PROGRESS: 40'\n\
             echo 'PROGRESS: 100'\n\
             echo done\n",
        );

        let output = Arc::new(Mutex::new(Vec::new()));
        let progress = Arc::new(Mutex::new(Vec::new()));

        let output_sink = Arc::clone(&output);
        let progress_sink = Arc::clone(&progress);
        let request = ExecutionRequest::new(script)
            .on_output(move |line: &str| output_sink.lock().unwrap().push(line.to_string()))
            .on_progress(move |p: u8| progress_sink.lock().unwrap().push(p));

        let host = shell_host();
        let result = host.execute(request).unwrap();

        assert!(result.success);
        assert_eq!(
            *output.lock().unwrap(),
            vec![
                "starting",
                "[warning] till 3 offline",
                "[verbose] opening database",
                "done"
            ]
        );
        assert_eq!(*progress.lock().unwrap(), vec![40, 100]);
        // Progress lines never pollute the accumulated output
        assert!(!result.output.contains("PROGRESS"));
    }

    #[test]
    #[cfg(unix)]
    #[serial]
    fn test_cancellation_is_distinguished_and_host_recovers() {
        let temp = TempDir::new().unwrap();
        let slow = write_script(&temp, "slow.sh", "sleep 30\n");
        let quick = write_script(&temp, "quick.sh", "echo back\n");

        let host = Arc::new(shell_host());

        let runner = {
            let host = Arc::clone(&host);
            let request = ExecutionRequest::new(slow);
            thread::spawn(move || host.execute(request).unwrap())
        };

        // Wait for the session to come up, then cancel
        while host.sessions_spawned() == 0 {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(100));
        host.stop();

        let result = runner.join().unwrap();
        assert!(!result.success);
        assert!(result.error_output.contains("cancelled by operator"));

        // Back to idle: a subsequent run succeeds normally
        let result = host.execute(ExecutionRequest::new(quick)).unwrap();
        assert!(result.success);
        assert_eq!(result.output, "back");

        // Stop with nothing in flight is a no-op
        host.stop();
    }

    #[test]
    #[cfg(unix)]
    #[serial]
    fn test_overlapping_execute_is_rejected() {
        let temp = TempDir::new().unwrap();
        let slow = write_script(&temp, "slow.sh", "sleep 30\n");

        let host = Arc::new(shell_host());

        let runner = {
            let host = Arc::clone(&host);
            let request = ExecutionRequest::new(slow.clone());
            thread::spawn(move || host.execute(request).unwrap())
        };

        while host.sessions_spawned() == 0 {
            thread::sleep(Duration::from_millis(10));
        }

        let second = host.execute(ExecutionRequest::new(slow));
        assert!(matches!(second, Err(HostError::Busy)));

        host.stop();
        let first = runner.join().unwrap();
        // The rejected call left the in-flight result untouched
        assert!(first.error_output.contains("cancelled by operator"));
    }
}
