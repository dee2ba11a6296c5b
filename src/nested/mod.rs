//! Nested dispatch: run a whole suite on an L0 guest.
//!
//! Five stages in strict order, none retried:
//!
//! 1. discover the L0 address through the guest agent
//! 2. stage the binary, suite, nested image and extra artifacts
//! 3. rewrite the remote suite to non-nested and run it
//! 4. copy the console transcripts back
//! 5. clean the remote workspace
//!
//! Cleanup runs once a target exists (after stage 2, 3 or 4 fails and after
//! success). Its failure is merged into whatever error is being returned.

pub mod remote;

pub use remote::{RemoteShell, RemoteTarget, SshRemote};

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::context::HostContext;
use crate::error::StepError;
use crate::hypervisor::Virsh;
use crate::paths;
use crate::suite::params::{self, sparse, Params};

use remote::quote;

/// Where and how to run the nested suite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedConfig {
    pub l0_name: String,
    pub l0_username: String,
    pub l0_password: String,
    /// Remote workspace directory on the L0 guest
    pub workspace: String,
    pub interface: String,
    pub discovery_timeout: Duration,
    /// Binary run on the L0 guest
    pub host_binary: PathBuf,
    /// Suite copied to and run on the L0 guest
    pub host_suite: PathBuf,
    pub nested_guest_image: PathBuf,
    pub extra_artifacts: Vec<PathBuf>,
    /// Where retrieved transcripts land
    pub local_log_dir: PathBuf,
    pub connect_uri: String,
}

#[derive(Debug, Default, Deserialize)]
struct NestedOverrides {
    #[serde(default, deserialize_with = "sparse")]
    l0_name: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    l0_username: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    l0_password: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    l0_location: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    l0_interface: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    discovery_timeout: Option<u64>,
    #[serde(default, deserialize_with = "sparse")]
    host_binary: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    host_suite: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    nested_guest_image: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    extra_artifacts: Option<Vec<String>>,
    #[serde(default, deserialize_with = "sparse")]
    local_log_dir: Option<String>,
    #[serde(default, deserialize_with = "sparse")]
    connect_uri: Option<String>,
}

impl NestedConfig {
    /// Build from suite params; `suite_path` is the suite being dispatched and
    /// is what gets copied unless `host_suite` says otherwise.
    pub fn from_params(params: &Params, suite_path: &Path) -> Result<Self, StepError> {
        let o: NestedOverrides = params::parse(params)?;

        let host_binary = match o.host_binary {
            Some(path) => paths::expand(&path),
            None => std::env::current_exe().map_err(|e| {
                StepError::Config(format!("cannot locate the running executable: {}", e))
            })?,
        };

        let config = NestedConfig {
            l0_name: o
                .l0_name
                .unwrap_or_else(|| "fedora43-virtualpilot-tcg-pseries".to_string()),
            l0_username: o.l0_username.unwrap_or_else(|| "root".to_string()),
            l0_password: o.l0_password.unwrap_or_else(|| "123456".to_string()),
            workspace: o
                .l0_location
                .unwrap_or_else(|| "/home/VirtualPilot".to_string()),
            interface: o.l0_interface.unwrap_or_else(|| "virbr0".to_string()),
            discovery_timeout: Duration::from_secs(o.discovery_timeout.unwrap_or(10)),
            host_binary,
            host_suite: o
                .host_suite
                .map(|p| paths::expand(&p))
                .unwrap_or_else(|| suite_path.to_path_buf()),
            nested_guest_image: paths::expand(
                o.nested_guest_image
                    .as_deref()
                    .unwrap_or("guests/qcows/small-fedora43.qcow2"),
            ),
            extra_artifacts: o
                .extra_artifacts
                .unwrap_or_default()
                .iter()
                .map(|p| paths::expand(p))
                .collect(),
            local_log_dir: paths::expand(o.local_log_dir.as_deref().unwrap_or(".")),
            connect_uri: o
                .connect_uri
                .unwrap_or_else(|| paths::DEFAULT_CONNECT_URI.to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), StepError> {
        if self.workspace.trim().trim_end_matches('/').is_empty() {
            return Err(StepError::Config(format!(
                "l0_location '{}' is not a usable workspace (empty or /)",
                self.workspace
            )));
        }
        if self.l0_name.trim().is_empty() {
            return Err(StepError::Config("l0_name must not be empty".to_string()));
        }
        Ok(())
    }

    fn target(&self, address: Ipv4Addr) -> RemoteTarget {
        RemoteTarget {
            address,
            username: self.l0_username.clone(),
            password: self.l0_password.clone(),
            workspace: self.workspace.trim_end_matches('/').to_string(),
        }
    }
}

/// Outcome of a successful dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub address: Ipv4Addr,
    /// Transcripts copied back to the local log directory
    pub retrieved: Vec<PathBuf>,
}

pub struct NestedDispatcher {
    ctx: HostContext,
}

impl NestedDispatcher {
    pub fn new(ctx: &HostContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    pub async fn dispatch(&self, config: &NestedConfig) -> Result<DispatchReport, StepError> {
        info!(target: "nested", stage = 1, l0 = %config.l0_name, "discovering L0 address");
        let virsh = Virsh::new(Arc::clone(&self.ctx.runner), config.connect_uri.clone());
        let address = virsh
            .domifaddr(&config.l0_name, &config.interface, config.discovery_timeout)
            .await?;
        info!(target: "nested", address = %address, "L0 address discovered");

        let target = config.target(address);
        let outcome = self.run_on_target(config, &target).await;

        info!(target: "nested", stage = 5, workspace = %target.workspace, "cleaning L0 workspace");
        let cleanup = self.cleanup(&target).await;

        match (outcome, cleanup) {
            (Ok(retrieved), Ok(())) => {
                info!(target: "nested", retrieved = retrieved.len(), "nested dispatch complete");
                Ok(DispatchReport { address, retrieved })
            }
            (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup_err)) => {
                warn!(target: "nested", error = %cleanup_err, "cleanup failed after stage failure");
                Err(e.merge(cleanup_err))
            }
        }
    }

    /// Stages 2 to 4.
    async fn run_on_target(
        &self,
        config: &NestedConfig,
        target: &RemoteTarget,
    ) -> Result<Vec<PathBuf>, StepError> {
        info!(target: "nested", stage = 2, "staging artifacts");
        let remote_suite = self.stage(config, target).await?;

        info!(target: "nested", stage = 3, suite = %remote_suite, "running suite on L0");
        self.run_remote(config, target, &remote_suite).await?;

        info!(target: "nested", stage = 4, "retrieving console logs");
        self.retrieve(config, target).await
    }

    /// Copy everything the remote run needs. Returns the remote suite path.
    async fn stage(&self, config: &NestedConfig, target: &RemoteTarget) -> Result<String, StepError> {
        let remote = self.ctx.remote.as_ref();
        remote
            .exec(target, "Create workspace", &format!("mkdir -p {}", quote(&target.workspace)))
            .await?;

        let mut remote_suite = None;
        let sources = [&config.host_binary, &config.host_suite, &config.nested_guest_image]
            .into_iter()
            .chain(config.extra_artifacts.iter());

        for (index, local) in sources.enumerate() {
            let name = file_name(local)?;
            if !local.is_file() {
                return Err(StepError::step(
                    "Stage artifacts",
                    format!("local file {} not found", local.display()),
                ));
            }
            let dest = target.workspace_path(&name);
            info!(target: "nested", from = %local.display(), to = %dest, "uploading");
            remote.upload(target, local, &dest).await?;
            if index == 1 {
                remote_suite = Some(dest);
            }
        }

        remote_suite.ok_or_else(|| StepError::step("Stage artifacts", "suite was not staged"))
    }

    async fn run_remote(
        &self,
        config: &NestedConfig,
        target: &RemoteTarget,
        remote_suite: &str,
    ) -> Result<(), StepError> {
        let remote = self.ctx.remote.as_ref();
        remote
            .exec(
                target,
                "Disable nesting in remote suite",
                &format!("sed -i 's/nested: true/nested: false/' {}", quote(remote_suite)),
            )
            .await?;

        let binary = format!("./{}", file_name(&config.host_binary)?);
        let command = format!(
            "cd {} && chmod +x {} && {} --sub-process --config {}",
            quote(&target.workspace),
            quote(&binary),
            quote(&binary),
            quote(remote_suite)
        );
        remote.exec(target, "Remote suite", &command).await?;
        Ok(())
    }

    async fn retrieve(
        &self,
        config: &NestedConfig,
        target: &RemoteTarget,
    ) -> Result<Vec<PathBuf>, StepError> {
        const STEP: &str = "Retrieve logs";
        let remote = self.ctx.remote.as_ref();

        let listing = remote
            .exec(
                target,
                STEP,
                &format!("ls -1 {}/console_*.log 2>/dev/null || true", quote(&target.workspace)),
            )
            .await?;
        let files: Vec<&str> = listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if files.is_empty() {
            return Err(StepError::step(STEP, "no console log files found on L0"));
        }

        std::fs::create_dir_all(&config.local_log_dir).map_err(|e| {
            StepError::step(STEP, format!("{}: {}", config.local_log_dir.display(), e))
        })?;

        let mut retrieved = Vec::with_capacity(files.len());
        for remote_file in files {
            let name = remote_file.rsplit('/').next().unwrap_or(remote_file);
            let local = config.local_log_dir.join(name);
            info!(target: "nested", from = %remote_file, to = %local.display(), "downloading");
            remote.download(target, remote_file, &local).await?;
            retrieved.push(local);
        }
        Ok(retrieved)
    }

    async fn cleanup(&self, target: &RemoteTarget) -> Result<(), StepError> {
        // Glob stays outside the quotes so the shell expands it
        let command = format!("rm -rf {}/*", quote(&target.workspace));
        self.ctx
            .remote
            .exec(target, "Cleanup", &command)
            .await
            .map(|_| ())
    }
}

fn file_name(path: &Path) -> Result<String, StepError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| StepError::Config(format!("{} has no file name", path.display())))
}
