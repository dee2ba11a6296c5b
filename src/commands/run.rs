use std::path::Path;
use tracing::info;

use crate::suite::Orchestrator;
use crate::types::OperationResult;

/// Run one suite and print the failure summary to stderr. Returns whether it
/// passed.
pub async fn cmd_run(orchestrator: &Orchestrator, suite: &Path) -> bool {
    info!(target: "suite", suite = %suite.display(), "vpilot run");
    let result = orchestrator.run_suite(suite).await;
    if let Some(summary) = failure_summary(suite, &result) {
        eprintln!("{}", summary);
        return false;
    }
    true
}

/// Text printed for a failed suite, `None` on success
pub fn failure_summary(suite: &Path, result: &OperationResult) -> Option<String> {
    if result.success {
        return None;
    }
    Some(format!(
        "\nTest failed: {}\nFailure: {}",
        suite.display(),
        result.detail.as_deref().unwrap_or("unknown error")
    ))
}
