//! Host-side services: management daemon restarts and accelerator modules.

pub mod modules;

pub use modules::{AcceleratorConfig, HostAcceleratorManager};

use std::collections::BTreeSet;
use tracing::info;

use crate::error::StepError;
use crate::exec::{run_step, CommandRunner, CommandSpec};

/// Restart a systemd service and wait for systemctl to return.
pub async fn restart_service(runner: &dyn CommandRunner, service: &str) -> Result<(), StepError> {
    info!(target: "host", service = %service, "restarting service");
    let step = format!("Restart {}", service);
    run_step(runner, &step, &CommandSpec::new("systemctl").args(["restart", service])).await?;
    Ok(())
}

/// Names of the currently loaded kernel modules, from `lsmod`.
pub async fn loaded_modules(runner: &dyn CommandRunner) -> Result<BTreeSet<String>, StepError> {
    let out = run_step(runner, "List modules", &CommandSpec::new("lsmod")).await?;
    Ok(parse_lsmod(&out))
}

fn parse_lsmod(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .skip_while(|line| line.starts_with("Module"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
