use crate::oracle::{Oracle, OracleResult};
use std::any::Any;
use std::fs::File;
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// The oracle ran to completion and classified the input.
    Completed(OracleResult),
    Timeout,
    /// The oracle panicked.
    Crash(String),
    /// The run could not be carried out (spawn failure, I/O error, ...).
    Other(String),
}

impl ExecutionStatus {
    /// The verdict recorded for an input; anything but a completed run is
    /// [`OracleResult::Undefined`].
    pub fn verdict(&self) -> OracleResult {
        match self {
            ExecutionStatus::Completed(verdict) => *verdict,
            _ => OracleResult::Undefined,
        }
    }
}

/// The execution boundary between the engine and the program under test.
pub trait Executor: Send {
    fn execute(&mut self, input: &str) -> ExecutionStatus;
}

/// Runs an [`Oracle`] inside the fuzzer process.
///
/// Panics are caught and reported as [`ExecutionStatus::Crash`]. With a
/// timeout configured, every call runs on a helper thread; a call that
/// overruns is reported as [`ExecutionStatus::Timeout`] and its thread is
/// left to finish on its own, since threads cannot be killed.
pub struct InProcessExecutor {
    oracle: Arc<dyn Oracle>,
    timeout: Option<Duration>,
}

impl InProcessExecutor {
    pub fn new<O: Oracle + 'static>(oracle: O) -> Self {
        Self {
            oracle: Arc::new(oracle),
            timeout: None,
        }
    }

    pub fn from_shared(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn run_guarded(oracle: &dyn Oracle, input: &str) -> ExecutionStatus {
        match catch_unwind(AssertUnwindSafe(|| oracle.examine(input))) {
            Ok(verdict) => ExecutionStatus::Completed(verdict),
            Err(panic_payload) => ExecutionStatus::Crash(panic_message(panic_payload.as_ref())),
        }
    }

    fn run_with_timeout(&self, input: &str, timeout: Duration) -> ExecutionStatus {
        let (sender, receiver) = mpsc::channel();
        let oracle = Arc::clone(&self.oracle);
        let owned_input = input.to_string();

        let spawned = std::thread::Builder::new()
            .name("oracle".to_string())
            .spawn(move || {
                let status = Self::run_guarded(oracle.as_ref(), &owned_input);
                // The receiver is gone when the caller already gave up.
                let _ = sender.send(status);
            });
        if let Err(e) = spawned {
            return ExecutionStatus::Other(format!("Failed to spawn oracle thread: {e}"));
        }

        match receiver.recv_timeout(timeout) {
            Ok(status) => status,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(?timeout, "Oracle exceeded its time budget, abandoning the call");
                ExecutionStatus::Timeout
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                ExecutionStatus::Other("Oracle thread exited without a verdict".to_string())
            }
        }
    }
}

impl Executor for InProcessExecutor {
    fn execute(&mut self, input: &str) -> ExecutionStatus {
        let status = match self.timeout {
            Some(timeout) => self.run_with_timeout(input, timeout),
            None => Self::run_guarded(self.oracle.as_ref(), input),
        };
        if let ExecutionStatus::Crash(msg) = &status {
            warn!(input, panic = %msg, "Oracle panicked");
        }
        status
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic type".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDelivery {
    StdIn,
    /// Write the input to a temporary file and substitute its path for `{}`
    /// in this argument template.
    File(String),
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
    /// Exit codes that mean "bug found". `None` treats every nonzero exit
    /// as failing; otherwise other nonzero codes are undefined.
    pub failing_exit_codes: Option<Vec<i32>>,
}

/// Runs an external program once per input and classifies its exit status.
///
/// Exit code 0 is passing, termination by a signal is failing, and other
/// codes follow `failing_exit_codes`. The child is killed when it outlives
/// the timeout.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandExecutorConfig {
        &self.config
    }

    fn run_and_wait_with_timeout(
        &self,
        mut child: Child,
        timeout: Duration,
    ) -> Result<ExitStatus, ExecutionStatus> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start_time.elapsed() > timeout {
                        warn!(command = ?self.config.command, "Target timed out, killing");
                        if let Err(e) = child.kill() {
                            return Err(ExecutionStatus::Other(format!(
                                "Failed to kill timed-out process: {e}",
                            )));
                        }
                        let _ = child.wait();
                        return Err(ExecutionStatus::Timeout);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => {
                    return Err(ExecutionStatus::Other(format!(
                        "Error waiting for child: {e}",
                    )));
                }
            }
        }
    }

    fn classify(&self, status: ExitStatus) -> OracleResult {
        if status.success() {
            return OracleResult::Passing;
        }
        match status.code() {
            Some(code) => match &self.config.failing_exit_codes {
                Some(codes) if !codes.contains(&code) => OracleResult::Undefined,
                _ => OracleResult::Failing,
            },
            // No exit code means the process was terminated by a signal.
            None => OracleResult::Failing,
        }
    }
}

/// Splits an argument template on whitespace and substitutes `path` for `{}`
/// in each word, so a path containing spaces stays a single argument.
fn file_arguments(template: &str, path: &str) -> Vec<String> {
    template
        .split_whitespace()
        .map(|part| part.replace("{}", path))
        .collect()
}

impl Executor for CommandExecutor {
    fn execute(&mut self, input: &str) -> ExecutionStatus {
        let Some((program, args)) = self.config.command.split_first() else {
            return ExecutionStatus::Other("Command is empty".to_string());
        };
        let mut cmd = Command::new(program);
        cmd.args(args);

        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }

        let mut temp_file_handle: Option<tempfile::NamedTempFile> = None;

        match &self.config.input_delivery {
            InputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                let named_temp_file = match tempfile::NamedTempFile::new() {
                    Ok(f) => f,
                    Err(e) => {
                        return ExecutionStatus::Other(format!("Failed to create temp file: {e}"));
                    }
                };
                if let Err(e) = File::create(named_temp_file.path())
                    .and_then(|mut f| f.write_all(input.as_bytes()))
                {
                    return ExecutionStatus::Other(format!(
                        "Failed to write to temp file {:?}: {}",
                        named_temp_file.path(),
                        e
                    ));
                }

                let Some(path_str) = named_temp_file.path().to_str() else {
                    return ExecutionStatus::Other("Temp file path is not valid UTF-8".to_string());
                };
                cmd.args(file_arguments(arg_template, path_str));
                cmd.stdin(Stdio::null());
                temp_file_handle = Some(named_temp_file);
            }
        }

        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        let mut child_process = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionStatus::Other(format!(
                    "Failed to spawn command '{:?}': {}",
                    self.config.command, e
                ));
            }
        };

        // The write runs on its own thread so a target that never drains its
        // stdin is still bounded by the timeout.
        let mut writer = None;
        if self.config.input_delivery == InputDelivery::StdIn {
            let Some(mut child_stdin) = child_process.stdin.take() else {
                let _ = child_process.kill();
                let _ = child_process.wait();
                return ExecutionStatus::Other(
                    "Child stdin was not available after piping.".to_string(),
                );
            };
            let bytes = input.as_bytes().to_vec();
            writer = Some(std::thread::spawn(move || child_stdin.write_all(&bytes)));
        }

        let status = match self.run_and_wait_with_timeout(child_process, self.config.timeout) {
            Ok(exit_status) => ExecutionStatus::Completed(self.classify(exit_status)),
            Err(status) => status,
        };
        drop(temp_file_handle);

        // A writer still blocked here feeds a grandchild holding the pipe open;
        // it ends once that process exits.
        if let Some(handle) = writer.filter(|handle| handle.is_finished()) {
            match handle.join() {
                // A target that exits without reading its input closes the
                // pipe; its exit status still decides the verdict.
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    if matches!(status, ExecutionStatus::Completed(_)) {
                        return ExecutionStatus::Other(format!("Failed to write to stdin: {e}"));
                    }
                }
                Ok(_) => {}
                Err(_) => return ExecutionStatus::Other("Stdin writer panicked".to_string()),
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_sign(input: &str) -> OracleResult {
        if input.starts_with('-') {
            OracleResult::Failing
        } else {
            OracleResult::Passing
        }
    }

    fn panicking_oracle(input: &str) -> OracleResult {
        if input == "boom" {
            panic!("oracle exploded on {input}");
        }
        OracleResult::Passing
    }

    #[test]
    fn in_process_executor_runs_oracle() {
        let mut executor = InProcessExecutor::new(classify_sign);
        assert_eq!(
            executor.execute("-3"),
            ExecutionStatus::Completed(OracleResult::Failing)
        );
        assert_eq!(
            executor.execute("3"),
            ExecutionStatus::Completed(OracleResult::Passing)
        );
    }

    #[test]
    fn in_process_executor_catches_panic() {
        let mut executor = InProcessExecutor::new(panicking_oracle);
        let status = executor.execute("boom");
        match &status {
            ExecutionStatus::Crash(msg) => assert!(msg.contains("oracle exploded on boom")),
            other => panic!("Expected Crash, got {other:?}"),
        }
        assert_eq!(status.verdict(), OracleResult::Undefined);
        assert_eq!(
            executor.execute("fine"),
            ExecutionStatus::Completed(OracleResult::Passing)
        );
    }

    #[test]
    fn in_process_executor_times_out_slow_oracle() {
        let slow = |input: &str| {
            if input == "slow" {
                std::thread::sleep(Duration::from_millis(500));
            }
            OracleResult::Passing
        };
        let mut executor = InProcessExecutor::new(slow).with_timeout(Duration::from_millis(50));
        assert_eq!(executor.execute("slow"), ExecutionStatus::Timeout);
        assert_eq!(
            executor.execute("fast"),
            ExecutionStatus::Completed(OracleResult::Passing)
        );
    }

    #[test]
    fn file_template_keeps_spaced_path_whole() {
        assert_eq!(
            file_arguments("--input {} -v", "/tmp/fuzz dir/input 1"),
            vec!["--input", "/tmp/fuzz dir/input 1", "-v"]
        );
        assert_eq!(file_arguments("--file={}", "a b"), vec!["--file=a b"]);
    }

    #[test]
    fn in_process_executor_reports_panic_under_timeout() {
        let mut executor =
            InProcessExecutor::new(panicking_oracle).with_timeout(Duration::from_secs(5));
        assert!(matches!(executor.execute("boom"), ExecutionStatus::Crash(_)));
    }
}
