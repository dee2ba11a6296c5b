//! Suite files and their dispatch.
//!
//! A suite names a handler (`script`), says whether it runs locally or on an
//! L0 guest (`nested`) and carries the handler's sparse `params`.

pub mod handlers;
pub mod params;
pub mod registry;

pub use params::Params;
pub use registry::{Handler, HandlerRegistry};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::context::HostContext;
use crate::error::StepError;
use crate::nested::{NestedConfig, NestedDispatcher};
use crate::types::OperationResult;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Suite {
    pub script: String,
    #[serde(default)]
    pub nested: bool,
    #[serde(default)]
    pub params: Option<Params>,
}

impl Suite {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading suite {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing suite {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let suite: Suite = serde_yaml::from_str(text)?;
        if suite.script.trim().is_empty() {
            anyhow::bail!("suite has an empty 'script'");
        }
        Ok(suite)
    }

    /// Handler name: the file stem of `script`, so `src/guest_bringup.py`
    /// and `guest_bringup` name the same handler.
    pub fn handler_name(&self) -> String {
        let script = self.script.trim();
        Path::new(script)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| script.to_string())
    }

    pub fn params(&self) -> Params {
        self.params.clone().unwrap_or_default()
    }
}

/// Loads a suite and runs it locally or through the nested dispatcher.
pub struct Orchestrator {
    ctx: HostContext,
    registry: HandlerRegistry,
}

impl Orchestrator {
    pub fn new(ctx: HostContext, registry: HandlerRegistry) -> Self {
        Self { ctx, registry }
    }

    /// Orchestrator with the built-in handlers on the real host
    pub fn system() -> Self {
        let ctx = HostContext::system();
        let registry = HandlerRegistry::with_builtin(&ctx);
        Self::new(ctx, registry)
    }

    pub async fn run_suite(&self, path: &Path) -> OperationResult {
        let result = self.try_run_suite(path).await;
        if let Err(e) = &result {
            warn!(target: "suite", suite = %path.display(), error = %e, "suite failed");
        }
        result.into()
    }

    async fn try_run_suite(&self, path: &Path) -> Result<Option<String>, StepError> {
        let suite = Suite::load(path).map_err(|e| StepError::Config(format!("{:#}", e)))?;
        let name = suite.handler_name();
        // Rejected up front, nested or not
        let handler = self.registry.resolve(&name)?;
        let params = suite.params();

        if suite.nested {
            info!(target: "suite", suite = %path.display(), handler = %name, "dispatching to L0 guest");
            let config = NestedConfig::from_params(&params, &absolute(path))?;
            let report = NestedDispatcher::new(&self.ctx).dispatch(&config).await?;
            return Ok(Some(report.address.to_string()));
        }

        info!(target: "suite", suite = %path.display(), handler = %name, "running handler");
        handler.run(&params).await
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
