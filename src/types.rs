use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StepError;

/// Guest accelerator mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Accelerator {
    /// Hardware-assisted execution
    #[default]
    Kvm,
    /// Software emulation
    Tcg,
}

impl TryFrom<String> for Accelerator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kvm" => Ok(Accelerator::Kvm),
            "tcg" => Ok(Accelerator::Tcg),
            other => Err(format!("unknown accelerator '{}' (expected kvm or tcg)", other)),
        }
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accelerator::Kvm => f.write_str("kvm"),
            Accelerator::Tcg => f.write_str("tcg"),
        }
    }
}

/// Uniform result returned to whoever invoked a handler.
///
/// `detail` carries data on success paths that produce some (for example a
/// discovered address) and the error text on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    pub detail: Option<String>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            detail: None,
        }
    }

    pub fn ok_with(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: Some(detail.into()),
        }
    }
}

impl From<StepError> for OperationResult {
    fn from(err: StepError) -> Self {
        OperationResult::failed(err.to_string())
    }
}

impl From<Result<Option<String>, StepError>> for OperationResult {
    fn from(result: Result<Option<String>, StepError>) -> Self {
        match result {
            Ok(detail) => OperationResult {
                success: true,
                detail,
            },
            Err(err) => err.into(),
        }
    }
}
