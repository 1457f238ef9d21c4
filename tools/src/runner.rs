//! External command runner with a hard timeout.
//!
//! Every run ends in exactly one of three outcomes: the tool could not be
//! started, it ran to completion (with any exit code), or it hung and was
//! killed. Runs are never retried.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time;

use crate::process::{ChildGuard, read_to_end_limited};

/// Per-stream capture cap.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// How long a killed process gets to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{program}: could not be started: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} failed ({}): {stderr}", exit_label(*.code))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{program} timed out after {} ms", .timeout.as_millis())]
    TimedOut { program: String, timeout: Duration },
}

fn exit_label(code: Option<i32>) -> String {
    code.map_or_else(|| "killed by signal".to_string(), |c| format!("exit code {c}"))
}

/// Captured output of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub program: String,
    /// `None` when terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug)]
pub enum CommandResult {
    Completed(CommandOutput),
    TimedOut { program: String, timeout: Duration },
    SpawnFailed { program: String, error: io::Error },
}

impl CommandResult {
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Success only for a zero exit code.
    pub fn into_output(self) -> Result<CommandOutput, ProcessError> {
        match self {
            Self::Completed(output) if output.success() => Ok(output),
            Self::Completed(output) => {
                let stderr = output.stderr.trim();
                let stderr = if stderr.is_empty() {
                    format!("{} produced no error output", output.program)
                } else {
                    stderr.to_string()
                };
                Err(ProcessError::NonZeroExit {
                    program: output.program,
                    code: output.exit_code,
                    stderr,
                })
            }
            Self::TimedOut { program, timeout } => Err(ProcessError::TimedOut { program, timeout }),
            Self::SpawnFailed { program, error } => Err(ProcessError::SpawnFailed {
                program,
                source: error,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    max_output_bytes: usize,
    env: Vec<(String, String)>,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            env: Vec::new(),
        }
    }
}

impl CommandRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max.max(1);
        self
    }

    /// Extra environment for every spawned process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run `argv[0]` with the remaining arguments in `cwd`.
    ///
    /// Stdin is closed; stdout and stderr are captured up to the output cap.
    /// On timeout the process (and on Unix its whole process group) is killed.
    /// Dropping the returned future kills it too.
    pub async fn run<S: AsRef<OsStr>>(
        &self,
        argv: &[S],
        cwd: &Path,
        timeout: Duration,
    ) -> CommandResult {
        let Some((program, args)) = argv.split_first() else {
            return CommandResult::SpawnFailed {
                program: String::new(),
                error: io::Error::new(io::ErrorKind::InvalidInput, "empty command line"),
            };
        };
        let name = program.as_ref().to_string_lossy().into_owned();

        let binary = match which::which(program) {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(program = %name, "Executable lookup failed: {e}");
                return CommandResult::SpawnFailed {
                    program: name,
                    error: io::Error::new(io::ErrorKind::NotFound, e.to_string()),
                };
            }
        };

        let mut cmd = Command::new(&binary);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        crate::process::set_new_session(&mut cmd);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(error) => {
                tracing::warn!(program = %name, "Failed to spawn: {error}");
                return CommandResult::SpawnFailed {
                    program: name,
                    error,
                };
            }
        };
        let mut guard = ChildGuard::new(child);
        tracing::debug!(program = %name, pid = guard.child_mut().id(), "Spawned");

        let max = self.max_output_bytes;
        let stdout_task = guard
            .child_mut()
            .stdout
            .take()
            .map(|out| tokio::spawn(read_to_end_limited(out, max)));
        let stderr_task = guard
            .child_mut()
            .stderr
            .take()
            .map(|err| tokio::spawn(read_to_end_limited(err, max)));

        let status = match time::timeout(timeout, guard.child_mut().wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(error)) => {
                return CommandResult::SpawnFailed {
                    program: name,
                    error,
                };
            }
            Err(_) => {
                tracing::warn!(
                    program = %name,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Command timed out, killing"
                );
                guard.kill_tree();
                if time::timeout(KILL_GRACE, guard.child_mut().wait())
                    .await
                    .is_ok()
                {
                    guard.disarm();
                } else {
                    tracing::warn!(program = %name, "Killed command did not exit in time");
                }
                for task in [stdout_task, stderr_task].into_iter().flatten() {
                    task.abort();
                }
                return CommandResult::TimedOut {
                    program: name,
                    timeout,
                };
            }
        };
        guard.disarm();

        // A backgrounded grandchild can hold the pipes open after exit.
        let collect = |task: Option<tokio::task::JoinHandle<(Vec<u8>, bool)>>| async move {
            let Some(task) = task else {
                return (Vec::new(), false);
            };
            match time::timeout(KILL_GRACE, task).await {
                Ok(Ok(captured)) => captured,
                _ => (Vec::new(), true),
            }
        };
        let (stdout, truncated_stdout) = collect(stdout_task).await;
        let (stderr, truncated_stderr) = collect(stderr_task).await;

        tracing::debug!(program = %name, code = ?status.code(), "Command finished");
        CommandResult::Completed(CommandOutput {
            program: name,
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            truncated: truncated_stdout || truncated_stderr,
        })
    }
}
