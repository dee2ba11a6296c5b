//! Fault-signature scan over console transcripts.
//!
//! The signature list is data, not code: it lives in `fault-signatures.toml`
//! at the crate root and is embedded at build time.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::StepError;

/// Catalog schema version this build understands
pub const CATALOG_VERSION: u32 = 1;

const EMBEDDED_CATALOG: &str = include_str!("../../fault-signatures.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    Panic,
    Bug,
    Oops,
    Trace,
    Segfault,
    ProtectionFault,
    RootMount,
    Oom,
    MachineCheck,
    Lockup,
    Stack,
    RcuStall,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FaultSignature {
    pub pattern: String,
    pub category: FaultCategory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaultCatalog {
    pub version: u32,
    #[serde(rename = "signature")]
    pub signatures: Vec<FaultSignature>,
}

impl FaultCatalog {
    /// The catalog shipped with this build
    pub fn builtin() -> Result<Self> {
        Self::from_toml(EMBEDDED_CATALOG).context("loading embedded fault catalog")
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let catalog: FaultCatalog = toml::from_str(text).context("parsing fault catalog")?;
        if catalog.version != CATALOG_VERSION {
            bail!(
                "unsupported fault catalog version {} (expected {})",
                catalog.version,
                CATALOG_VERSION
            );
        }
        if let Some(empty) = catalog.signatures.iter().position(|s| s.pattern.trim().is_empty()) {
            bail!("fault signature #{} has an empty pattern", empty + 1);
        }
        Ok(catalog)
    }

    /// Case-insensitive scan returning every matching signature in catalog order.
    pub fn scan(&self, transcript: &str) -> ScanReport<'_> {
        let haystack = transcript.to_lowercase();
        let matches: Vec<&FaultSignature> = self
            .signatures
            .iter()
            .filter(|sig| haystack.contains(&sig.pattern.to_lowercase()))
            .collect();
        debug!(target: "analyzer", signatures = self.signatures.len(), matched = matches.len(), "transcript scanned");
        ScanReport { matches }
    }
}

/// Result of one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport<'a> {
    pub matches: Vec<&'a FaultSignature>,
}

impl ScanReport<'_> {
    pub fn is_clean(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn patterns(&self) -> Vec<&str> {
        self.matches.iter().map(|sig| sig.pattern.as_str()).collect()
    }

    pub fn into_result(self) -> Result<(), StepError> {
        if self.is_clean() {
            return Ok(());
        }
        let signatures: Vec<String> = self.patterns().into_iter().map(str::to_string).collect();
        warn!(target: "analyzer", found = ?signatures, "fault signatures in console log");
        Err(StepError::Validation { signatures })
    }
}
