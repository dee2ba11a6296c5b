//! Remote shell and file copy against an L0 guest.
//!
//! Every call opens a fresh connection; nothing is pooled. Credentials reach
//! `sshpass` through its environment, never the command line.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::StepError;
use crate::exec::{failure_text, CommandOutput, CommandRunner, CommandSpec};

/// Exit status ssh reserves for its own (connection) errors
const SSH_CONNECTION_ERROR: i32 = 255;
/// sshpass: wrong password
const SSHPASS_AUTH_FAILED: i32 = 5;
/// sshpass: host key unknown or changed
const SSHPASS_HOST_KEY: i32 = 6;

/// One L0 guest session target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub address: Ipv4Addr,
    pub username: String,
    pub password: String,
    /// Remote directory all artifacts are staged into
    pub workspace: String,
}

impl RemoteTarget {
    /// Path of `name` inside the workspace
    pub fn workspace_path(&self, name: &str) -> String {
        format!("{}/{}", self.workspace.trim_end_matches('/'), name)
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run a shell command on the target, returning its stdout.
    async fn exec(&self, target: &RemoteTarget, step: &str, command: &str)
        -> Result<String, StepError>;

    /// Copy a local file to `remote` on the target.
    async fn upload(&self, target: &RemoteTarget, local: &Path, remote: &str)
        -> Result<(), StepError>;

    /// Copy `remote` from the target into `local`.
    async fn download(&self, target: &RemoteTarget, remote: &str, local: &Path)
        -> Result<(), StepError>;
}

/// `sshpass -e ssh|scp` over the host's OpenSSH client
pub struct SshRemote {
    runner: Arc<dyn CommandRunner>,
    connect_timeout: Duration,
}

impl SshRemote {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            connect_timeout: Duration::from_secs(10),
        }
    }

    fn base(&self, tool: &str, target: &RemoteTarget) -> CommandSpec {
        CommandSpec::new("sshpass")
            .env("SSHPASS", target.password.clone())
            .args(["-e", tool])
            .args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "LogLevel=ERROR",
                "-o",
            ])
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
    }

    async fn run(&self, step: &str, spec: CommandSpec) -> Result<String, StepError> {
        debug!(target: "nested", step = %step, command = %spec.display(), "remote call");
        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| StepError::connectivity(step, format!("{:#}", e)))?;
        classify(step, output)
    }
}

/// Split ssh/sshpass failures into connectivity and remote-command failures.
pub fn classify(step: &str, output: CommandOutput) -> Result<String, StepError> {
    if output.success() {
        return Ok(output.stdout.trim().to_string());
    }
    match output.code {
        Some(SSH_CONNECTION_ERROR) | Some(SSHPASS_AUTH_FAILED) | Some(SSHPASS_HOST_KEY) => {
            Err(StepError::connectivity(step, failure_text(&output)))
        }
        _ => Err(StepError::command(step, failure_text(&output))),
    }
}

#[async_trait]
impl RemoteShell for SshRemote {
    async fn exec(
        &self,
        target: &RemoteTarget,
        step: &str,
        command: &str,
    ) -> Result<String, StepError> {
        let spec = self
            .base("ssh", target)
            .arg(target.destination())
            .arg(command);
        self.run(step, spec).await
    }

    async fn upload(
        &self,
        target: &RemoteTarget,
        local: &Path,
        remote: &str,
    ) -> Result<(), StepError> {
        let spec = self
            .base("scp", target)
            .arg(local.display().to_string())
            .arg(format!("{}:{}", target.destination(), remote));
        self.run(&format!("Upload {}", local.display()), spec).await?;
        Ok(())
    }

    async fn download(
        &self,
        target: &RemoteTarget,
        remote: &str,
        local: &Path,
    ) -> Result<(), StepError> {
        let spec = self
            .base("scp", target)
            .arg(format!("{}:{}", target.destination(), remote))
            .arg(local.display().to_string());
        self.run(&format!("Download {}", remote), spec).await?;
        Ok(())
    }
}

/// Single-quote `s` for a POSIX shell.
pub fn quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
