//! External command execution.
//!
//! Everything vpilot does to the host goes through a [`CommandRunner`]:
//! virsh, virt-install, systemctl, modprobe, lsmod and the ssh/scp tools.
//! Each call blocks the calling step until the process exits or the
//! caller-imposed timeout elapses.

use anyhow::{Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::StepError;

/// One external command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment, never logged (may carry credentials)
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// Leave the process running in the background when the timeout elapses
    /// instead of killing it
    pub detach_on_timeout: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn detach_on_timeout(mut self) -> Self {
        self.detach_on_timeout = true;
        self
    }

    /// Command line for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal or still running
    pub code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }
}

/// Runs external commands on behalf of the lifecycle steps
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion (or timeout). `Err` means the command could
    /// not be run at all; a non-zero exit is reported through the output.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as real host processes via tokio
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait::async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(target: "exec", command = %spec.display(), "running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(!spec.detach_on_timeout);

        let child = cmd
            .spawn()
            .with_context(|| format!("spawning {}", spec.program))?;

        // Waiting happens in its own task so a detached process keeps its
        // pipes drained after we stop waiting for it.
        let mut waiter = tokio::spawn(child.wait_with_output());

        let output = match spec.timeout {
            None => (&mut waiter).await,
            Some(limit) => match tokio::time::timeout(limit, &mut waiter).await {
                Ok(joined) => joined,
                Err(_) => {
                    if spec.detach_on_timeout {
                        info!(target: "exec", command = %spec.program, timeout_secs = limit.as_secs(),
                            "command still running, leaving it in the background");
                    } else {
                        waiter.abort();
                        debug!(target: "exec", command = %spec.program, "command timed out, killed");
                    }
                    return Ok(CommandOutput::timed_out());
                }
            },
        };

        let output = output
            .context("joining command waiter")?
            .with_context(|| format!("waiting for {}", spec.program))?;

        Ok(CommandOutput {
            code: output.status.code(),
            timed_out: false,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run one lifecycle step's command and map the outcome onto [`StepError`].
///
/// Returns trimmed stdout on success.
pub async fn run_step(
    runner: &dyn CommandRunner,
    step: &str,
    spec: &CommandSpec,
) -> Result<String, StepError> {
    let output = runner
        .run(spec)
        .await
        .map_err(|e| StepError::command(step, format!("{:#}", e)))?;

    if output.timed_out {
        return Err(StepError::Timeout {
            step: step.to_string(),
            expected: format!("{} to exit", spec.program),
            after: spec.timeout.unwrap_or_default(),
        });
    }

    if !output.success() {
        return Err(StepError::command(step, failure_text(&output)));
    }

    Ok(output.stdout.trim().to_string())
}

/// Best available description of a failed command: stderr, else stdout, else
/// the exit status.
pub fn failure_text(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    match output.code {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}
