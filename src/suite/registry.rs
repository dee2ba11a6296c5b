use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::handlers::{BringDownHandler, BringUpHandler};
use super::params::Params;
use crate::context::HostContext;
use crate::error::StepError;
use crate::guest::GuestLifecycle;

/// A suite entry point. Handlers are compiled in and looked up by name.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run with the suite's params. `Ok(Some(..))` carries data for the caller.
    async fn run(&self, params: &Params) -> Result<Option<String>, StepError>;
}

/// Name → handler map, populated once at startup
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the lifecycle handlers wired to `ctx`
    pub fn with_builtin(ctx: &HostContext) -> Self {
        let lifecycle = Arc::new(GuestLifecycle::new(ctx));
        let mut registry = Self::new();
        registry.register("guest_bringup", Arc::new(BringUpHandler::new(Arc::clone(&lifecycle))));
        registry.register("guest_bringdown", Arc::new(BringDownHandler::new(lifecycle)));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        let name = name.into();
        debug!(target: "suite", handler = %name, "handler registered");
        self.handlers.insert(name, handler);
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Handler>, StepError> {
        self.handlers.get(name).cloned().ok_or_else(|| {
            StepError::Config(format!(
                "unknown handler '{}' (available: {})",
                name,
                self.names().join(", ")
            ))
        })
    }
}
