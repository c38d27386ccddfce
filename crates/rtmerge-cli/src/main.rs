//! rtmerge - merge per-architecture runtime packages

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rtmerge_cli::ui::ConsoleReporter;
use rtmerge_cli::{Cli, exit_code};
use rtmerge_core::Reporter;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let reporter = Arc::new(ConsoleReporter::new(cli.quiet));

    match rtmerge_cli::run(&cli, reporter.clone()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            reporter.error(&format!("{err:#}"));
            ExitCode::from(exit_code(&err))
        }
    }
}
