//! libvirt command-line collaborators.
//!
//! [`Virsh`] wraps the domain verbs the lifecycle needs; [`install`] builds the
//! virt-install invocation.

pub mod install;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::StepError;
use crate::exec::{failure_text, run_step, CommandRunner, CommandSpec};
use crate::readiness;

/// Domain state reported by `virsh domstate` once a guest has stopped
pub const STATE_SHUT_OFF: &str = "shut off";

/// virsh bound to one libvirt connection
#[derive(Clone)]
pub struct Virsh {
    runner: Arc<dyn CommandRunner>,
    connect_uri: String,
}

impl Virsh {
    pub fn new(runner: Arc<dyn CommandRunner>, connect_uri: impl Into<String>) -> Self {
        Self {
            runner,
            connect_uri: connect_uri.into(),
        }
    }

    fn command<I, S>(&self, verb: &str, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("virsh")
            .args(["--connect", self.connect_uri.as_str(), verb])
            .args(args)
    }

    /// Command line that boots `name` and attaches to its serial console
    pub fn console_command(&self, name: &str) -> Vec<String> {
        let spec = self.command("start", [name, "--console"]);
        std::iter::once(spec.program).chain(spec.args).collect()
    }

    /// Ask the guest to power off (ACPI)
    pub async fn shutdown(&self, name: &str) -> Result<String, StepError> {
        info!(target: "virsh", guest = %name, "shutting down guest");
        run_step(self.runner.as_ref(), "Shutdown", &self.command("shutdown", [name])).await
    }

    /// Hard power off
    pub async fn destroy(&self, name: &str) -> Result<String, StepError> {
        info!(target: "virsh", guest = %name, "force destroying guest");
        run_step(self.runner.as_ref(), "Destroy", &self.command("destroy", [name])).await
    }

    /// Remove the domain definition
    pub async fn undefine(&self, name: &str) -> Result<String, StepError> {
        info!(target: "virsh", guest = %name, "undefining guest");
        run_step(self.runner.as_ref(), "Undefine", &self.command("undefine", [name])).await
    }

    pub async fn domstate(&self, name: &str) -> Result<String, StepError> {
        run_step(self.runner.as_ref(), "Domain state", &self.command("domstate", [name])).await
    }

    /// Poll the domain state until it reads `state` or `deadline` passes.
    pub async fn wait_for_state(
        &self,
        name: &str,
        state: &str,
        deadline: Duration,
    ) -> Result<bool, StepError> {
        readiness::poll_until(
            &format!("{} {}", name, state),
            deadline,
            readiness::POLL_INTERVAL,
            || async move {
                let current = self.domstate(name).await?;
                debug!(target: "virsh", guest = %name, state = %current, "domain state");
                Ok(current.lines().next().map(str::trim) == Some(state))
            },
        )
        .await
    }

    /// Look up the first IPv4 address the guest agent reports on `interface`.
    pub async fn domifaddr(
        &self,
        name: &str,
        interface: &str,
        timeout: Duration,
    ) -> Result<Ipv4Addr, StepError> {
        const STEP: &str = "Address discovery";

        let spec = self
            .command(
                "domifaddr",
                [name, "--source", "agent", "--interface", interface, "--full"],
            )
            .timeout(timeout);

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| StepError::connectivity(STEP, format!("{:#}", e)))?;

        if output.timed_out {
            return Err(StepError::connectivity(
                STEP,
                format!("virsh domifaddr timed out after {}s", timeout.as_secs()),
            ));
        }
        if !output.success() {
            return Err(StepError::connectivity(
                STEP,
                format!("virsh domifaddr failed: {}", failure_text(&output)),
            ));
        }

        parse_ipv4(&output.stdout).ok_or_else(|| {
            StepError::connectivity(STEP, "no IPv4 address found in virsh domifaddr output")
        })
    }
}

/// First `a.b.c.d/prefix` token on the first line that mentions ipv4.
pub fn parse_ipv4(domifaddr: &str) -> Option<Ipv4Addr> {
    domifaddr
        .lines()
        .filter(|line| line.contains("ipv4"))
        .flat_map(|line| line.split_whitespace())
        .filter_map(|token| token.split_once('/'))
        .find_map(|(addr, _prefix)| addr.parse().ok())
}
