use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::error::StepError;
use crate::exec::{failure_text, CommandRunner, CommandSpec};
use crate::guest::GuestSpec;
use crate::paths;
use crate::types::Accelerator;

/// Direct kernel boot override passed to the installer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectBoot {
    pub kernel: String,
    pub initrd: String,
    pub cmdline: String,
}

/// Resolve the direct-boot override for `spec`.
///
/// In host-kernel mode, missing kernel/initrd default to the host's boot files
/// and a missing cmdline is read verbatim from `cmdline_source`. Outside that
/// mode the override only applies when all three values are given.
pub fn resolve_direct_boot(spec: &GuestSpec, cmdline_source: &Path) -> Result<Option<DirectBoot>> {
    let (kernel, initrd, cmdline) = if spec.host_kernel {
        let kernel = spec
            .kernel
            .clone()
            .unwrap_or_else(|| paths::host_kernel().display().to_string());
        let initrd = spec
            .initrd
            .clone()
            .unwrap_or_else(|| paths::host_initrd().display().to_string());
        let cmdline = match &spec.cmdline {
            Some(cmdline) => cmdline.clone(),
            None => std::fs::read_to_string(cmdline_source)
                .with_context(|| format!("reading host cmdline from {}", cmdline_source.display()))?
                .trim()
                .to_string(),
        };
        (Some(kernel), Some(initrd), Some(cmdline))
    } else {
        (spec.kernel.clone(), spec.initrd.clone(), spec.cmdline.clone())
    };

    match (kernel, initrd, cmdline) {
        (Some(kernel), Some(initrd), Some(cmdline)) => Ok(Some(DirectBoot {
            kernel,
            initrd,
            cmdline,
        })),
        (kernel, initrd, cmdline) => {
            if kernel.is_some() || initrd.is_some() || cmdline.is_some() {
                warn!(target: "install", guest = %spec.name,
                    "partial kernel/initrd/cmdline override ignored; all three are required");
            }
            Ok(None)
        }
    }
}

/// Full virt-install argument list for `spec`
pub fn install_args(spec: &GuestSpec, boot: Option<&DirectBoot>) -> Vec<String> {
    let mut args = vec![
        format!("--connect={}", spec.connect_uri),
        "--hvm".to_string(),
        format!("--name={}", spec.name),
        format!("--machine={}", spec.machine),
        format!("--memory={}", spec.memory_mib),
        format!("--cpu={}", spec.cpu),
        format!("--vcpu={}", spec.vcpus),
        "--import".to_string(),
        "--nographics".to_string(),
        "--noautoconsole".to_string(),
        format!("--os-variant={}", spec.os_variant),
        "--console".to_string(),
        "pty,target_type=serial".to_string(),
        "--memballoon".to_string(),
        "model=virtio".to_string(),
        "--controller".to_string(),
        "type=scsi,model=virtio-scsi".to_string(),
        format!("--disk=path={},bus=scsi,format=qcow2", spec.disk.display()),
        format!("--network=bridge={},model=virtio", spec.network_bridge),
    ];

    match spec.accelerator {
        Accelerator::Kvm => args.push("--accelerate".to_string()),
        Accelerator::Tcg => args.push("--virt-type=qemu".to_string()),
    }

    let mut boot_opts = Vec::new();
    if let Some(emulator) = &spec.emulator {
        boot_opts.push(format!("emulator={}", emulator));
    }
    if let Some(boot) = boot {
        boot_opts.push(format!("kernel={}", boot.kernel));
        boot_opts.push(format!("initrd={}", boot.initrd));
        boot_opts.push(format!("cmdline='{}'", boot.cmdline));
    }
    if !boot_opts.is_empty() {
        args.push("--boot".to_string());
        args.push(boot_opts.join(","));
    }

    args.push("--noreboot".to_string());
    args
}

/// Run virt-install for `spec`.
///
/// The installer gets `spec.install_timeout` to fail. A non-zero exit inside
/// that window fails the step with its stderr; a clean exit or a process that
/// is still running when the window closes counts as installed, and a
/// still-running installer is left to finish in the background.
pub async fn virt_install(
    runner: &dyn CommandRunner,
    spec: &GuestSpec,
    boot: Option<&DirectBoot>,
) -> Result<(), StepError> {
    const STEP: &str = "virt-install";

    let cmd = CommandSpec::new("virt-install")
        .args(install_args(spec, boot))
        .timeout(spec.install_timeout)
        .detach_on_timeout();

    info!(target: "install", guest = %spec.name, accelerator = %spec.accelerator, "installing guest");
    info!(target: "install", "virt-install command: {}", cmd.display());

    let output = runner
        .run(&cmd)
        .await
        .map_err(|e| StepError::command(STEP, format!("{:#}", e)))?;

    if output.timed_out {
        info!(target: "install", guest = %spec.name,
            wait_secs = spec.install_timeout.as_secs(), "installer still running after wait window");
        return Ok(());
    }
    if !output.success() {
        return Err(StepError::command(STEP, failure_text(&output)));
    }
    Ok(())
}
