use clap::Parser;
use std::path::PathBuf;

use crate::paths;

#[derive(Parser, Debug)]
#[command(name = "vpilot", version, about = "Lifecycle test runner for libvirt guests")]
pub struct Cli {
    /// Suite file to run
    #[arg(long, default_value = paths::DEFAULT_SUITE)]
    pub config: PathBuf,

    /// Plain log output for runs driven by another vpilot (no time, level or color)
    #[arg(long, hide = true)]
    pub sub_process: bool,
}
