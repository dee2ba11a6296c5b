use clap::Parser;
use tracing_subscriber::EnvFilter;
use vpilot::{cli, commands, suite::Orchestrator};

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Sub-process mode: the parent already prints time and level, keep only
    // the target tags so the nesting stays readable.
    if cli.sub_process {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
            )
            .with_target(true)
            .without_time()
            .with_level(false)
            .with_ansi(false)
            .init();
    } else {
        let use_color = atty::is(atty::Stream::Stdout);
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
            )
            .with_target(true)
            .with_ansi(use_color)
            .init();
    }

    let orchestrator = Orchestrator::system();
    if !commands::cmd_run(&orchestrator, &cli.config).await {
        std::process::exit(1);
    }
}
