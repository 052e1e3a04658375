// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Command runner
//!
//! Runs external tools with a bounded timeout and cooperative cancellation.
//! Output is captured so failures can be reported with the tool's own message.

use crate::domain::error::{DeployError, DeployResult};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last few lines of stderr (or stdout when stderr is empty).
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let collected: Vec<&str> = source.lines().collect();
        let start = collected.len().saturating_sub(lines);
        collected[start..].join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
    cancel: CancellationToken,
}

impl CommandRunner {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: self.cancel.clone(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `program args...` and capture its output. A non-zero exit is not
    /// an error here; callers decide with [`CommandOutput::success`].
    pub async fn run(
        &self,
        program: &str,
        args: &[&str],
        work_dir: Option<&Path>,
    ) -> DeployResult<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.execute(cmd, &display(program, args), work_dir, None).await
    }

    /// Run a shell line through `sh -c`.
    pub async fn run_shell(&self, line: &str, work_dir: Option<&Path>) -> DeployResult<CommandOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        self.execute(cmd, line, work_dir, None).await
    }

    /// Run `program args...` feeding `input` on stdin.
    pub async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: Vec<u8>,
    ) -> DeployResult<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.execute(cmd, &display(program, args), None, Some(input)).await
    }

    /// Like [`run_shell`](Self::run_shell) but a non-zero exit becomes a
    /// [`DeployError::Command`].
    pub async fn run_shell_checked(
        &self,
        line: &str,
        work_dir: Option<&Path>,
    ) -> DeployResult<CommandOutput> {
        let output = self.run_shell(line, work_dir).await?;
        if !output.success() {
            return Err(DeployError::command(
                line,
                format!("exit code {:?}: {}", output.code, output.tail(5)),
            ));
        }
        Ok(output)
    }

    async fn execute(
        &self,
        mut cmd: Command,
        label: &str,
        work_dir: Option<&Path>,
        input: Option<Vec<u8>>,
    ) -> DeployResult<CommandOutput> {
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        debug!(command = %label, "Running command");
        let mut child = cmd
            .spawn()
            .map_err(|e| DeployError::command(label, format!("failed to spawn: {}", e)))?;

        // Feed stdin from a task so a chatty child cannot stall on a full stdout pipe.
        if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
            let label = label.to_string();
            tokio::spawn(async move {
                use tokio::io::AsyncWriteExt;
                if let Err(e) = stdin.write_all(&bytes).await {
                    warn!(command = %label, "Failed to write stdin: {}", e);
                }
            });
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                warn!(command = %label, "Command cancelled, killing process");
                Err(DeployError::Interrupted)
            }
            _ = tokio::time::sleep(self.timeout) => {
                warn!(command = %label, "Command timed out after {:?}", self.timeout);
                Err(DeployError::command(label, format!("timed out after {:?}", self.timeout)))
            }
            output = child.wait_with_output() => {
                let output = output
                    .map_err(|e| DeployError::command(label, format!("failed to wait: {}", e)))?;
                Ok(CommandOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
        }
    }
}

fn display(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Quote a value for inclusion in a `sh -c` line.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
