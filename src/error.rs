//! Step error taxonomy.
//!
//! Every lifecycle step, accelerator toggle, console exchange and remote stage
//! reports failure as a [`StepError`]. Bring-up propagates the first one
//! untouched; bring-down and nested cleanup keep going and fold what they
//! collect into [`StepError::Aggregate`].

use std::fmt;
use std::time::Duration;

/// Separator between the members of an aggregated error message.
pub const AGGREGATE_SEPARATOR: &str = " | ";

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// An external tool exited non-zero (or could not be spawned).
    #[error("{step} failed: {stderr}")]
    Command { step: String, stderr: String },

    /// An expected pattern or process exit never arrived in time.
    #[error("{step} timed out after {}s waiting for {expected}", .after.as_secs())]
    Timeout {
        step: String,
        expected: String,
        after: Duration,
    },

    /// Address discovery, remote session or console attach failed.
    #[error("{step} failed: {detail}")]
    Connectivity { step: String, detail: String },

    /// The log analyzer matched one or more fault signatures.
    #[error("Found {} error pattern(s) in console log: {}", .signatures.len(), .signatures.join(", "))]
    Validation { signatures: Vec<String> },

    /// A host-side step failed without an external command being involved.
    #[error("{step} failed: {detail}")]
    Step { step: String, detail: String },

    /// Suite, handler or parameter problem detected before anything ran.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Two or more failures collected by a phase that keeps going.
    #[error("{}", Joined(.0))]
    Aggregate(Vec<StepError>),
}

struct Joined<'a>(&'a [StepError]);

impl fmt::Display for Joined<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(AGGREGATE_SEPARATOR)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl StepError {
    pub fn command(step: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Command {
            step: step.into(),
            stderr: stderr.into(),
        }
    }

    pub fn connectivity(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Connectivity {
            step: step.into(),
            detail: detail.into(),
        }
    }

    pub fn step(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            detail: detail.into(),
        }
    }

    /// Wrap plumbing errors (I/O, spawn failures) for a named step.
    pub fn internal(step: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Step {
            step: step.into(),
            detail: format!("{:#}", err),
        }
    }

    /// Fold collected failures: none is success, one stays as itself,
    /// two or more become an [`StepError::Aggregate`]. Nested aggregates are
    /// flattened so the message keeps a single separator style.
    pub fn collect(errors: Vec<StepError>) -> Result<(), StepError> {
        let mut flat: Vec<StepError> = errors.into_iter().flat_map(StepError::into_members).collect();

        match flat.len() {
            0 => Ok(()),
            1 => Err(flat.remove(0)),
            _ => Err(StepError::Aggregate(flat)),
        }
    }

    /// Append `other` to this error, preserving both messages.
    pub fn merge(self, other: StepError) -> StepError {
        let mut flat = self.into_members();
        flat.extend(other.into_members());
        StepError::Aggregate(flat)
    }

    fn into_members(self) -> Vec<StepError> {
        match self {
            StepError::Aggregate(inner) => inner,
            other => vec![other],
        }
    }
}
