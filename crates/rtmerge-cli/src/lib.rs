//! rtmerge - merge per-architecture runtime packages
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Downloads the `osx-arm64` and `osx-x64` builds of a native interop runtime
//! package, checks that they ship the same license (and ideally the same
//! managed library), re-binds the managed library's `__Internal` imports to
//! the shipped native library, and writes one combined layout:
//!
//! ```text
//! <OUTPUT_DIR>/
//! ├── LICENSE
//! ├── lib/<tfm>/<managed library>
//! └── runtimes/<rid>/native/<native library>   # one per architecture
//! ```

pub mod ui;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::style::Stylize;
use rtmerge_core::patcher::read_imports;
use rtmerge_core::{HttpFetcher, PackagePipeline, PipelineError, Reporter};
use rtmerge_schema::MergeConfig;

use crate::ui::{ConsoleReporter, Theme};

/// Exit code for a missing or non-directory output path.
pub const EXIT_MISSING_OUTPUT_DIR: u8 = 2;
/// Exit code when the two packages ship different licenses.
pub const EXIT_LICENSE_MISMATCH: u8 = 3;
/// Exit code for differing managed libraries under `--deny-managed-mismatch`.
pub const EXIT_MANAGED_MISMATCH: u8 = 4;
/// Exit code for every other failure.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Parser)]
#[command(name = "rtmerge")]
#[command(
    author,
    version = env!("RTMERGE_VERSION"),
    about = "Merge per-architecture runtime packages into one redistributable"
)]
pub struct Cli {
    /// Existing directory that receives the merged layout
    #[arg(value_name = "OUTPUT_DIR", required_unless_present = "list_imports")]
    pub output_dir: Option<PathBuf>,

    /// TOML file overriding package sources and names
    #[arg(long, value_name = "FILE", env = "RTMERGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Fail instead of warning when the managed libraries differ
    #[arg(long)]
    pub deny_managed_mismatch: bool,

    /// Print the result as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,

    /// List the unmanaged imports of a managed library and exit
    #[arg(long, value_name = "DLL", conflicts_with = "output_dir")]
    pub list_imports: Option<PathBuf>,
}

/// Built-in defaults, or the file at `path`.
pub fn load_config(path: Option<&Path>) -> Result<MergeConfig> {
    let Some(path) = path else {
        return Ok(MergeConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = MergeConfig::from_toml_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Process exit code for a failed run.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::MissingOutputDirectory(_)) => EXIT_MISSING_OUTPUT_DIR,
        Some(PipelineError::LicenseMismatch { .. }) => EXIT_LICENSE_MISMATCH,
        Some(PipelineError::ManagedLibraryMismatch { .. }) => EXIT_MANAGED_MISMATCH,
        _ => EXIT_FAILURE,
    }
}

/// Execute the command line.
pub async fn run(cli: &Cli, reporter: Arc<ConsoleReporter>) -> Result<()> {
    if let Some(dll) = &cli.list_imports {
        return list_imports(dll, cli.json);
    }
    let output_dir = cli
        .output_dir
        .as_deref()
        .context("OUTPUT_DIR is required")?;

    let mut config = load_config(cli.config.as_deref())?;
    if cli.deny_managed_mismatch {
        config.strict_managed = true;
    }

    let fetcher = HttpFetcher::new().context("Failed to create HTTP client")?;
    let pipeline = PackagePipeline::new(config, fetcher, reporter.clone());
    let report = pipeline.run(output_dir).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        reporter.success(&format!(
            "Merged {} and {} into {}",
            report.runtimes[0],
            report.runtimes[1],
            output_dir.display()
        ));
    }
    Ok(())
}

fn list_imports(dll: &Path, json: bool) -> Result<()> {
    let image =
        std::fs::read(dll).with_context(|| format!("Failed to read {}", dll.display()))?;
    let imports = read_imports(&image)
        .with_context(|| format!("Failed to read imports of {}", dll.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&imports)?);
        return Ok(());
    }

    let theme = Theme::default();
    let width = imports.iter().map(|i| i.module.len()).max().unwrap_or(0);
    for import in &imports {
        println!(
            "  {}  {}  {}",
            format!("{:<width$}", import.module).with(theme.colors.runtime),
            import.symbol,
            import.member.as_str().with(theme.colors.secondary)
        );
    }
    Ok(())
}
