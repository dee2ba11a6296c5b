use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{loaded_modules, restart_service};
use crate::error::StepError;
use crate::exec::{run_step, CommandRunner, CommandSpec};
use crate::paths;

/// What to toggle and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorConfig {
    /// Modprobe config that blocks the modules from loading
    pub blacklist_path: PathBuf,
    /// Modules in unload order: dependents first, base module last
    pub modules: Vec<String>,
    /// Management service restarted after toggling
    pub service: String,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            blacklist_path: paths::kvm_blacklist(),
            modules: vec!["kvm_hv".to_string(), "kvm".to_string()],
            service: paths::MANAGEMENT_SERVICE.to_string(),
        }
    }
}

/// Switches hardware acceleration off for software-emulation runs and back on
/// afterwards.
///
/// Both directions are strictly ordered; the first failing step aborts with
/// an error naming that step.
pub struct HostAcceleratorManager {
    runner: Arc<dyn CommandRunner>,
    config: AcceleratorConfig,
}

impl HostAcceleratorManager {
    pub fn new(runner: Arc<dyn CommandRunner>, config: AcceleratorConfig) -> Self {
        Self { runner, config }
    }

    /// Blacklist, unload, verify unloaded, restart the service.
    pub async fn disable(&self) -> Result<(), StepError> {
        warn_unless_root();
        info!(target: "accel", modules = ?self.config.modules, "disabling accelerator modules");

        // Base module first, matching the order modprobe would resolve them
        for module in self.config.modules.iter().rev() {
            self.blacklist(module)?;
        }

        for module in &self.config.modules {
            let spec = CommandSpec::new("modprobe").args(["-r", module.as_str()]);
            match self.runner.run(&spec).await {
                Ok(out) if out.success() => debug!(target: "accel", module = %module, "module unloaded"),
                Ok(out) => debug!(target: "accel", module = %module, stderr = %out.stderr.trim(), "unload skipped"),
                Err(e) => debug!(target: "accel", module = %module, error = %e, "unload skipped"),
            }
        }

        let loaded = loaded_modules(self.runner.as_ref()).await?;
        let still_loaded: Vec<&str> = self
            .config
            .modules
            .iter()
            .filter(|m| loaded.contains(m.as_str()))
            .map(String::as_str)
            .collect();
        if !still_loaded.is_empty() {
            return Err(StepError::step(
                "Verify modules unloaded",
                format!("accelerator modules still loaded: {}", still_loaded.join(", ")),
            ));
        }

        restart_service(self.runner.as_ref(), &self.config.service).await?;
        info!(target: "accel", "accelerator disabled");
        Ok(())
    }

    /// Remove the blacklist, load, verify loaded, restart the service.
    pub async fn restore(&self) -> Result<(), StepError> {
        warn_unless_root();
        info!(target: "accel", modules = ?self.config.modules, "restoring accelerator modules");

        match std::fs::remove_file(&self.config.blacklist_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(target: "accel", path = %self.config.blacklist_path.display(), "no blacklist to remove");
            }
            Err(e) => {
                return Err(StepError::step(
                    "Remove module blacklist",
                    format!("{}: {}", self.config.blacklist_path.display(), e),
                ))
            }
        }

        for module in self.config.modules.iter().rev() {
            let step = format!("Load module {}", module);
            run_step(
                self.runner.as_ref(),
                &step,
                &CommandSpec::new("modprobe").arg(module.as_str()),
            )
            .await?;
        }

        let loaded = loaded_modules(self.runner.as_ref()).await?;
        let missing: Vec<&str> = self
            .config
            .modules
            .iter()
            .filter(|m| !loaded.contains(m.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(StepError::step(
                "Verify modules loaded",
                format!("accelerator modules not loaded: {}", missing.join(", ")),
            ));
        }

        restart_service(self.runner.as_ref(), &self.config.service).await?;
        info!(target: "accel", "accelerator restored");
        Ok(())
    }

    fn blacklist(&self, module: &str) -> Result<(), StepError> {
        let path = &self.config.blacklist_path;
        debug!(target: "accel", module = %module, path = %path.display(), "adding blacklist entry");

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "install {} /bin/false", module));

        result.map_err(|e| {
            StepError::step(
                format!("Blacklist {}", module),
                format!("{}: {}", path.display(), e),
            )
        })
    }
}

fn warn_unless_root() {
    if !nix::unistd::Uid::effective().is_root() {
        warn!(target: "accel", "not running as root; module toggling will likely fail");
    }
}
