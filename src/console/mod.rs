//! Serial console login used to validate a boot.
//!
//! One fixed exchange, no scripting: wait for the login prompt, send the
//! username, wait for the password prompt, send the password, wait for a
//! shell prompt. Each wait blocks the calling thread until the pattern shows
//! up or the boot timeout elapses. No retries.

pub mod transcript;

pub use transcript::Transcript;

use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::StepError;

const STEP: &str = "Console";

/// Everything needed for one login round-trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Attach command, e.g. `virsh start <name> --console`
    pub command: Vec<String>,
    pub username: String,
    pub password: String,
    pub login_prompt: String,
    pub password_prompt: String,
    pub shell_prompt: String,
    pub boot_timeout: Duration,
}

/// Drives the console login; implementations block.
pub trait ConsoleLogin: Send + Sync {
    fn login(&self, request: &LoginRequest, transcript: &Transcript) -> Result<(), StepError>;
}

/// Console login over a pseudo-terminal via rexpect
#[derive(Debug, Default, Clone)]
pub struct PtyConsole;

impl ConsoleLogin for PtyConsole {
    fn login(&self, request: &LoginRequest, transcript: &Transcript) -> Result<(), StepError> {
        let (program, args) = request
            .command
            .split_first()
            .ok_or_else(|| StepError::Config("empty console command".to_string()))?;

        info!(target: "console", command = %request.command.join(" "), "attaching to console");

        let mut cmd = Command::new(program);
        cmd.args(args);
        let timeout_ms = request.boot_timeout.as_millis() as u64;
        let mut session = rexpect::session::spawn_command(cmd, Some(timeout_ms))
            .map_err(|e| StepError::connectivity(STEP, format!("attach failed: {}", e)))?;

        let wait = |session: &mut rexpect::session::PtySession, pattern: &str, what: &str| {
            session
                .exp_regex(pattern)
                .map_err(|e| expect_failure(e, what, request, transcript))
        };

        let (boot_output, prompt) = wait(&mut session, &request.login_prompt, "login prompt")?;
        record(transcript, &boot_output)?;
        record(transcript, &prompt)?;
        debug!(target: "console", bytes = boot_output.len(), "login prompt seen");

        session
            .send_line(&request.username)
            .map_err(|e| StepError::connectivity(STEP, format!("sending username: {}", e)))?;
        let (before, prompt) = wait(&mut session, &request.password_prompt, "password prompt")?;
        record(transcript, &before)?;
        record(transcript, &prompt)?;

        session
            .send_line(&request.password)
            .map_err(|e| StepError::connectivity(STEP, format!("sending password: {}", e)))?;
        let (before, prompt) = wait(&mut session, &request.shell_prompt, "shell prompt")?;
        record(transcript, &redact(&before, &request.password))?;
        record(transcript, &prompt)?;

        info!(target: "console", "logged in to guest console");
        Ok(())
    }
}

fn record(transcript: &Transcript, text: &str) -> Result<(), StepError> {
    transcript
        .append(text)
        .map_err(|e| StepError::internal("Write transcript", e))
}

/// Keep what arrived before a failed wait, then classify the failure.
fn expect_failure(
    err: rexpect::error::Error,
    what: &str,
    request: &LoginRequest,
    transcript: &Transcript,
) -> StepError {
    use rexpect::error::Error;

    let keep = |got: &str| {
        if let Err(e) = transcript.append(&redact(got, &request.password)) {
            warn!(target: "console", error = %e, "failed to save partial console output");
        }
    };

    match err {
        Error::Timeout { got, .. } => {
            keep(&unescape_timeout(&got));
            warn!(target: "console", waiting_for = what, "console timeout");
            StepError::Timeout {
                step: STEP.to_string(),
                expected: what.to_string(),
                after: request.boot_timeout,
            }
        }
        Error::EOF { got, .. } => {
            keep(&got);
            warn!(target: "console", waiting_for = what, "console connection closed");
            StepError::connectivity(STEP, format!("connection closed while waiting for {}", what))
        }
        other => StepError::connectivity(STEP, format!("waiting for {}: {}", what, other)),
    }
}

/// rexpect marks control characters in a timed-out buffer; put the raw bytes back.
fn unescape_timeout(got: &str) -> String {
    got.replace("`^`", "\u{1b}")
        .replace("`\\r`", "\r")
        .replace("`\\n`\n", "\n")
}

fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, "********")
    }
}
