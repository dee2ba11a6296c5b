use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::StepError;
use crate::paths;
use crate::suite::params::{self, sparse, Params};
use crate::types::Accelerator;

/// Fully materialized description of one test guest.
///
/// Built once per handler invocation from [`GuestSpec::default`] plus the
/// suite's overrides, then never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestSpec {
    pub name: String,
    pub accelerator: Accelerator,
    pub machine: String,
    pub memory_mib: u32,
    pub vcpus: u32,
    pub cpu: String,
    pub disk: PathBuf,
    pub os_variant: String,
    pub kernel: Option<String>,
    pub initrd: Option<String>,
    pub cmdline: Option<String>,
    /// Boot the host's own kernel, filling kernel/initrd/cmdline from the host
    pub host_kernel: bool,
    pub network_bridge: String,
    pub emulator: Option<String>,
    pub connect_uri: String,
    pub username: String,
    pub password: String,
    pub login_prompt: String,
    pub password_prompt: String,
    pub shell_prompt: String,
    pub boot_timeout: Duration,
    pub install_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Directory the console transcript is written to
    pub log_dir: PathBuf,
    pub disable_kvm: bool,
    pub restore_kvm: bool,
    /// Accelerator modules in unload order (dependents first)
    pub kvm_modules: Vec<String>,
}

impl Default for GuestSpec {
    fn default() -> Self {
        Self {
            name: "fedora42-virtualpilot-kvm-pseries".to_string(),
            accelerator: Accelerator::Kvm,
            machine: "pseries".to_string(),
            memory_mib: 4096,
            vcpus: 4,
            cpu: "POWER11".to_string(),
            disk: PathBuf::from("./guests/qcows/large-fedora43.qcow2"),
            os_variant: "fedora43".to_string(),
            kernel: None,
            initrd: None,
            cmdline: None,
            host_kernel: false,
            network_bridge: "virbr0".to_string(),
            emulator: Some("/usr/bin/qemu-system-ppc64".to_string()),
            connect_uri: paths::DEFAULT_CONNECT_URI.to_string(),
            username: "root".to_string(),
            password: "123456".to_string(),
            login_prompt: r"\w+ login: ".to_string(),
            password_prompt: "[Pp]assword: ".to_string(),
            shell_prompt: ".*[#$] ".to_string(),
            boot_timeout: Duration::from_secs(40),
            install_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(60),
            log_dir: PathBuf::from("."),
            disable_kvm: false,
            restore_kvm: false,
            kvm_modules: vec!["kvm_hv".to_string(), "kvm".to_string()],
        }
    }
}

/// Caller-supplied overrides; any absent field keeps its default.
#[derive(Debug, Default, Deserialize)]
pub struct GuestOverrides {
    #[serde(default, deserialize_with = "sparse")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub accelerator: Option<Accelerator>,
    #[serde(default, deserialize_with = "sparse")]
    pub machine: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub memory: Option<u32>,
    #[serde(default, deserialize_with = "sparse")]
    pub vcpus: Option<u32>,
    #[serde(default, deserialize_with = "sparse")]
    pub cpu: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub qcow_path: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub os_variant: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub kernel: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub initrd: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub cmdline: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub host_kernel: Option<bool>,
    #[serde(default, deserialize_with = "sparse")]
    pub network_bridge: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub emulator: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub connect_uri: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub login_prompt: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub password_prompt: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub shell_prompt: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub boot_timeout: Option<u64>,
    #[serde(default, deserialize_with = "sparse")]
    pub virt_install_timeout: Option<u64>,
    #[serde(default, deserialize_with = "sparse")]
    pub shutdown_timeout: Option<u64>,
    #[serde(default, deserialize_with = "sparse")]
    pub log_dir: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    pub disable_kvm: Option<bool>,
    #[serde(default, deserialize_with = "sparse")]
    pub restore_kvm: Option<bool>,
    #[serde(default, deserialize_with = "sparse")]
    pub kvm_modules: Option<Vec<String>>,
}

impl GuestSpec {
    /// Build a spec from suite params.
    pub fn from_params(params: &Params) -> Result<Self, StepError> {
        let overrides: GuestOverrides = params::parse(params)?;
        Self::merge(Self::default(), overrides)
    }

    /// Merge `overrides` onto `base`; an override wins whenever it is present.
    pub fn merge(base: GuestSpec, o: GuestOverrides) -> Result<Self, StepError> {
        let spec = GuestSpec {
            name: o.name.unwrap_or(base.name),
            accelerator: o.accelerator.unwrap_or(base.accelerator),
            machine: o.machine.unwrap_or(base.machine),
            memory_mib: o.memory.unwrap_or(base.memory_mib),
            vcpus: o.vcpus.unwrap_or(base.vcpus),
            cpu: o.cpu.unwrap_or(base.cpu),
            disk: o.qcow_path.map(|p| paths::expand(&p)).unwrap_or(base.disk),
            os_variant: o.os_variant.unwrap_or(base.os_variant),
            kernel: o.kernel.or(base.kernel),
            initrd: o.initrd.or(base.initrd),
            cmdline: o.cmdline.or(base.cmdline),
            host_kernel: o.host_kernel.unwrap_or(base.host_kernel),
            network_bridge: o.network_bridge.unwrap_or(base.network_bridge),
            emulator: o.emulator.or(base.emulator),
            connect_uri: o.connect_uri.unwrap_or(base.connect_uri),
            username: o.username.unwrap_or(base.username),
            password: o.password.unwrap_or(base.password),
            login_prompt: o.login_prompt.unwrap_or(base.login_prompt),
            password_prompt: o.password_prompt.unwrap_or(base.password_prompt),
            shell_prompt: o.shell_prompt.unwrap_or(base.shell_prompt),
            boot_timeout: o.boot_timeout.map(Duration::from_secs).unwrap_or(base.boot_timeout),
            install_timeout: o
                .virt_install_timeout
                .map(Duration::from_secs)
                .unwrap_or(base.install_timeout),
            shutdown_timeout: o
                .shutdown_timeout
                .map(Duration::from_secs)
                .unwrap_or(base.shutdown_timeout),
            log_dir: o.log_dir.map(|p| paths::expand(&p)).unwrap_or(base.log_dir),
            disable_kvm: o.disable_kvm.unwrap_or(base.disable_kvm),
            restore_kvm: o.restore_kvm.unwrap_or(base.restore_kvm),
            kvm_modules: o.kvm_modules.unwrap_or(base.kvm_modules),
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), StepError> {
        if self.name.trim().is_empty() {
            return Err(StepError::Config("guest name must not be empty".to_string()));
        }
        if self.kvm_modules.is_empty() && (self.disable_kvm || self.restore_kvm) {
            return Err(StepError::Config(
                "module toggling requested but kvm_modules is empty".to_string(),
            ));
        }
        for (field, pattern) in [
            ("login_prompt", &self.login_prompt),
            ("password_prompt", &self.password_prompt),
            ("shell_prompt", &self.shell_prompt),
        ] {
            if pattern.is_empty() {
                return Err(StepError::Config(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }
}
