use async_trait::async_trait;
use std::sync::Arc;

use super::params::Params;
use super::registry::Handler;
use crate::error::StepError;
use crate::guest::{GuestLifecycle, GuestSpec};

/// `guest_bringup`: install, log in, validate. Reports the transcript path.
pub struct BringUpHandler {
    lifecycle: Arc<GuestLifecycle>,
}

impl BringUpHandler {
    pub fn new(lifecycle: Arc<GuestLifecycle>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl Handler for BringUpHandler {
    async fn run(&self, params: &Params) -> Result<Option<String>, StepError> {
        let spec = GuestSpec::from_params(params)?;
        let report = self.lifecycle.bring_up(&spec).await?;
        Ok(Some(report.transcript.display().to_string()))
    }
}

/// `guest_bringdown`: stop, undefine, optionally restore modules.
pub struct BringDownHandler {
    lifecycle: Arc<GuestLifecycle>,
}

impl BringDownHandler {
    pub fn new(lifecycle: Arc<GuestLifecycle>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl Handler for BringDownHandler {
    async fn run(&self, params: &Params) -> Result<Option<String>, StepError> {
        let spec = GuestSpec::from_params(params)?;
        self.lifecycle.bring_down(&spec).await?;
        Ok(None)
    }
}
