pub mod analyzer;
pub mod cli;
pub mod commands;
pub mod console;
pub mod context;
pub mod error;
pub mod exec;
pub mod guest;
pub mod host;
pub mod hypervisor;
pub mod nested;
pub mod paths;
pub mod readiness;
pub mod suite;
pub mod types;

pub use context::HostContext;
pub use error::StepError;
pub use types::{Accelerator, OperationResult};
