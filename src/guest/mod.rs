//! Guest lifecycle: bring-up and bring-down.

pub mod spec;

pub use spec::{GuestOverrides, GuestSpec};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::analyzer::FaultCatalog;
use crate::console::{ConsoleLogin, LoginRequest, Transcript};
use crate::context::HostContext;
use crate::error::StepError;
use crate::exec::CommandRunner;
use crate::host::{self, AcceleratorConfig, HostAcceleratorManager};
use crate::hypervisor::{install, Virsh, STATE_SHUT_OFF};
use crate::paths;
use crate::types::Accelerator;

/// Bring-up progress, logged as each step completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpState {
    ServicePrepared,
    AcceleratorConfigured,
    Installed,
    LoggedIn,
    Validated,
    Failed,
}

impl fmt::Display for BringUpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BringUpState::ServicePrepared => "service-prepared",
            BringUpState::AcceleratorConfigured => "accelerator-configured",
            BringUpState::Installed => "installed",
            BringUpState::LoggedIn => "logged-in",
            BringUpState::Validated => "validated",
            BringUpState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a successful bring-up leaves behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BringUpReport {
    pub transcript: PathBuf,
}

/// Drives a guest through bring-up and bring-down on one host.
pub struct GuestLifecycle {
    runner: Arc<dyn CommandRunner>,
    console: Arc<dyn ConsoleLogin>,
    blacklist_path: PathBuf,
    cmdline_source: PathBuf,
}

impl GuestLifecycle {
    pub fn new(ctx: &HostContext) -> Self {
        Self {
            runner: Arc::clone(&ctx.runner),
            console: Arc::clone(&ctx.console),
            blacklist_path: ctx.blacklist_path.clone(),
            cmdline_source: ctx.cmdline_source.clone(),
        }
    }

    fn virsh(&self, spec: &GuestSpec) -> Virsh {
        Virsh::new(Arc::clone(&self.runner), spec.connect_uri.clone())
    }

    fn accelerator_manager(&self, spec: &GuestSpec) -> HostAcceleratorManager {
        HostAcceleratorManager::new(
            Arc::clone(&self.runner),
            AcceleratorConfig {
                blacklist_path: self.blacklist_path.clone(),
                modules: spec.kvm_modules.clone(),
                service: paths::MANAGEMENT_SERVICE.to_string(),
            },
        )
    }

    /// Install the guest, log in on its console and check the boot output.
    ///
    /// Fail-fast: the first failing step is returned as-is and nothing after
    /// it runs. The transcript records the outcome either way.
    pub async fn bring_up(&self, spec: &GuestSpec) -> Result<BringUpReport, StepError> {
        info!(target: "bringup", guest = %spec.name, accelerator = %spec.accelerator, "starting bring-up");

        let transcript = Transcript::create(&spec.log_dir, &spec.name)
            .map_err(|e| StepError::internal("Create transcript", e))?;
        let transcript = Arc::new(transcript);

        match self.bring_up_steps(spec, &transcript).await {
            Ok(()) => {
                transcript.close(true, None);
                info!(target: "bringup", guest = %spec.name, "bring-up complete");
                Ok(BringUpReport {
                    transcript: transcript.path().to_path_buf(),
                })
            }
            Err(e) => {
                transition(spec, BringUpState::Failed);
                transcript.close(false, Some(&e.to_string()));
                Err(e)
            }
        }
    }

    async fn bring_up_steps(
        &self,
        spec: &GuestSpec,
        transcript: &Arc<Transcript>,
    ) -> Result<(), StepError> {
        host::restart_service(self.runner.as_ref(), paths::MANAGEMENT_SERVICE).await?;
        transition(spec, BringUpState::ServicePrepared);

        if spec.disable_kvm {
            self.accelerator_manager(spec).disable().await?;
        }
        transition(spec, BringUpState::AcceleratorConfigured);

        let boot = install::resolve_direct_boot(spec, &self.cmdline_source)
            .map_err(|e| StepError::internal("Resolve direct boot", e))?;
        install::virt_install(self.runner.as_ref(), spec, boot.as_ref()).await?;
        transition(spec, BringUpState::Installed);

        let request = LoginRequest {
            command: self.virsh(spec).console_command(&spec.name),
            username: spec.username.clone(),
            password: spec.password.clone(),
            login_prompt: spec.login_prompt.clone(),
            password_prompt: spec.password_prompt.clone(),
            shell_prompt: spec.shell_prompt.clone(),
            boot_timeout: spec.boot_timeout,
        };
        let console = Arc::clone(&self.console);
        let session_log = Arc::clone(transcript);
        tokio::task::spawn_blocking(move || console.login(&request, &session_log))
            .await
            .map_err(|e| StepError::step("Console", format!("login task failed: {}", e)))??;
        transition(spec, BringUpState::LoggedIn);

        let catalog =
            FaultCatalog::builtin().map_err(|e| StepError::internal("Load fault catalog", e))?;
        let text = transcript
            .contents()
            .map_err(|e| StepError::internal("Read transcript", e))?;
        catalog.scan(&text).into_result()?;
        transition(spec, BringUpState::Validated);

        Ok(())
    }

    /// Stop, undefine and optionally restore the host accelerator.
    ///
    /// Every step is attempted regardless of earlier failures; all failures
    /// are reported together.
    pub async fn bring_down(&self, spec: &GuestSpec) -> Result<(), StepError> {
        info!(target: "bringdown", guest = %spec.name, accelerator = %spec.accelerator, "starting bring-down");
        let virsh = self.virsh(spec);
        let mut errors: Vec<StepError> = Vec::new();

        match spec.accelerator {
            Accelerator::Tcg => {
                if let Err(e) = virsh.destroy(&spec.name).await {
                    errors.push(e);
                }
            }
            Accelerator::Kvm => {
                if let Err(shutdown_err) = self.graceful_shutdown(&virsh, spec).await {
                    warn!(target: "bringdown", guest = %spec.name, error = %shutdown_err,
                        "graceful shutdown failed, destroying");
                    if let Err(destroy_err) = virsh.destroy(&spec.name).await {
                        errors.push(shutdown_err);
                        errors.push(destroy_err);
                    }
                }
            }
        }

        if let Err(e) = virsh.undefine(&spec.name).await {
            errors.push(e);
        }

        if spec.restore_kvm {
            if let Err(e) = self.accelerator_manager(spec).restore().await {
                errors.push(e);
            }
        }

        let result = StepError::collect(errors);
        match &result {
            Ok(()) => info!(target: "bringdown", guest = %spec.name, "bring-down complete"),
            Err(e) => warn!(target: "bringdown", guest = %spec.name, error = %e, "bring-down finished with errors"),
        }
        result
    }

    async fn graceful_shutdown(&self, virsh: &Virsh, spec: &GuestSpec) -> Result<(), StepError> {
        virsh.shutdown(&spec.name).await?;
        let stopped = virsh
            .wait_for_state(&spec.name, STATE_SHUT_OFF, spec.shutdown_timeout)
            .await?;
        if stopped {
            Ok(())
        } else {
            Err(StepError::Timeout {
                step: "Shutdown".to_string(),
                expected: format!("domain to reach '{}'", STATE_SHUT_OFF),
                after: spec.shutdown_timeout,
            })
        }
    }
}

fn transition(spec: &GuestSpec, state: BringUpState) {
    info!(target: "bringup", guest = %spec.name, state = %state, "state transition");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(BringUpState::AcceleratorConfigured.to_string(), "accelerator-configured");
        assert_eq!(BringUpState::Failed.to_string(), "failed");
    }
}
