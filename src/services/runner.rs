//! Command Runner
//!
//! Executes one recipe command at a time through `/bin/sh -c` inside a
//! deployment workspace. The command string is handed to the shell
//! verbatim; pipes, semicolons and variable expansion are the shell's
//! business, not ours.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::{self, Instant};
use tracing::debug;

/// Hard per-command deadline, independent of any group deadline
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn shell: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Captured result of one command execution
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Merged stdout and stderr
    pub output: String,
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    /// Whether the command hit its deadline
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// Run a single command with the workspace as working directory.
    ///
    /// The effective deadline is the per-command timeout intersected with
    /// `outer_deadline` (when present); whichever fires first kills the
    /// subprocess.
    pub async fn run(
        &self,
        workspace: &Path,
        command: &str,
        outer_deadline: Option<Instant>,
        extra_env: &[(&str, String)],
    ) -> Result<CommandOutcome, RunnerError> {
        let mut deadline = Instant::now() + COMMAND_TIMEOUT;
        if let Some(outer) = outer_deadline {
            deadline = deadline.min(outer);
        }

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in extra_env {
            cmd.env(key, value);
        }

        let child = cmd.spawn()?;
        match time::timeout_at(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut merged = String::from_utf8_lossy(&output.stdout).into_owned();
                merged.push_str(&String::from_utf8_lossy(&output.stderr));
                debug!(
                    command,
                    exit_code = ?output.status.code(),
                    output_bytes = merged.len(),
                    "command finished"
                );
                Ok(CommandOutcome {
                    output: merged,
                    exit_code: output.status.code(),
                    timed_out: false,
                })
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Ok(CommandOutcome {
                output: String::new(),
                exit_code: None,
                timed_out: true,
            }),
        }
    }
}
