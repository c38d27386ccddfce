//! The merge run: fetch both variants, read, verify, patch, emit.
//!
//! Nothing is written until every gate has passed, so a failed run leaves the
//! output directory as it found it.

use std::path::{Path, PathBuf};

use rtmerge_schema::{ConfigError, LICENSE_OUTPUT_PATH, MergeConfig, RuntimeId, SourceConfig};
use serde::Serialize;
use thiserror::Error;

use crate::io::archive::{ArchiveError, ArchiveReader};
use crate::io::download::{FetchError, Fetcher};
use crate::io::layout::{Layout, LayoutError, WrittenFile};
use crate::package::{EntryRole, PackageContents};
use crate::patcher::{MetadataPatcher, PatchError, PatchRules, PatchSummary};
use crate::reporter::Reporter;
use crate::verify::{self, Difference};

/// Errors that end a merge run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The output directory is missing or not a directory.
    #[error("Output directory {} does not exist or is not a directory", .0.display())]
    MissingOutputDirectory(PathBuf),

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// An archive could not be retrieved.
    #[error("Failed to fetch the {runtime} package: {source}")]
    Fetch {
        /// Variant being fetched.
        runtime: RuntimeId,
        /// Underlying failure.
        #[source]
        source: FetchError,
    },

    /// An archive could not be read.
    #[error("Failed to read the {runtime} package: {source}")]
    Archive {
        /// Variant being read.
        runtime: RuntimeId,
        /// Underlying failure.
        #[source]
        source: ArchiveError,
    },

    /// The variants ship different license files.
    #[error("License files differ between {left} and {right}: {difference}")]
    LicenseMismatch {
        /// Canonical variant.
        left: RuntimeId,
        /// Other variant.
        right: RuntimeId,
        /// Where they diverge.
        difference: Difference,
    },

    /// The variants ship different managed libraries and strict mode is on.
    #[error("Managed libraries differ between {left} and {right}: {difference}")]
    ManagedLibraryMismatch {
        /// Canonical variant.
        left: RuntimeId,
        /// Other variant.
        right: RuntimeId,
        /// Where they diverge.
        difference: Difference,
    },

    /// The canonical managed library could not be patched.
    #[error("Failed to patch the managed library: {0}")]
    Patch(#[from] PatchError),

    /// The merged package could not be written.
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    /// Variant whose license and managed library were emitted.
    pub canonical_runtime: RuntimeId,
    /// Every variant merged, canonical first.
    pub runtimes: Vec<RuntimeId>,
    /// The managed libraries differed and the canonical one was used.
    pub managed_mismatch: bool,
    /// Where the managed libraries diverged, when they did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_difference: Option<Difference>,
    /// Changes made to the managed library.
    pub patch: PatchSummary,
    /// Files written, relative to the output directory.
    pub files: Vec<WrittenFile>,
}

/// Drives one merge.
pub struct PackagePipeline<F, R> {
    config: MergeConfig,
    fetcher: F,
    reporter: R,
}

impl<F: Fetcher, R: Reporter> PackagePipeline<F, R> {
    pub fn new(config: MergeConfig, fetcher: F, reporter: R) -> Self {
        Self {
            config,
            fetcher,
            reporter,
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merge the two configured packages into `output_dir`.
    ///
    /// # Errors
    ///
    /// See [`PipelineError`]. On error no file has been written, except when
    /// writing itself fails part way.
    pub async fn run(&self, output_dir: &Path) -> Result<MergeReport, PipelineError> {
        if !output_dir.is_dir() {
            return Err(PipelineError::MissingOutputDirectory(
                output_dir.to_path_buf(),
            ));
        }
        self.config.validate()?;
        let (first, second) = (&self.config.sources[0], &self.config.sources[1]);

        self.reporter.section("Fetching");
        let (first_archive, second_archive) =
            futures::try_join!(self.fetch(first), self.fetch(second))?;

        self.reporter.section("Reading");
        let reader = ArchiveReader::new(&self.config);
        let canonical = self.read(&reader, &first_archive, &first.runtime)?;
        let other = self.read(&reader, &second_archive, &second.runtime)?;
        drop((first_archive, second_archive));

        self.reporter.section("Verifying");
        if !verify::licenses_equal(&canonical, &other) {
            return Err(PipelineError::LicenseMismatch {
                left: canonical.runtime.clone(),
                right: other.runtime.clone(),
                difference: difference_of(&canonical, &other, EntryRole::License),
            });
        }
        self.reporter.success("License files match");

        let mut managed_difference = None;
        if verify::managed_libraries_equal(&canonical, &other) {
            self.reporter.success("Managed libraries match");
        } else {
            let difference = difference_of(&canonical, &other, EntryRole::ManagedLibrary);
            if self.config.strict_managed {
                return Err(PipelineError::ManagedLibraryMismatch {
                    left: canonical.runtime.clone(),
                    right: other.runtime.clone(),
                    difference,
                });
            }
            let message = format!(
                "Managed libraries differ between {} and {} ({difference}); using the {} build",
                canonical.runtime, other.runtime, canonical.runtime
            );
            tracing::warn!("{message}");
            self.reporter.warning(&message);
            managed_difference = Some(difference);
        }

        self.reporter.section("Patching");
        let patcher = MetadataPatcher::new(PatchRules::from_config(&self.config));
        let patched = patcher.patch(&canonical.managed_library)?;
        self.reporter.info(&format!(
            "Rebound {} import(s) from '{}' to '{}'",
            patched.summary.renamed.len(),
            patched.summary.module_from,
            patched.summary.module_to
        ));
        if patched.summary.signature_invalidated {
            self.reporter
                .warning("The managed library was signed; its signature no longer matches");
        }

        let canonical_runtime = canonical.runtime.clone();
        let runtimes = vec![canonical.runtime.clone(), other.runtime.clone()];

        let mut layout = Layout::new();
        layout.push(LICENSE_OUTPUT_PATH, canonical.license);
        layout.push(self.config.managed_output_path(), patched.bytes);
        layout.push(
            self.config.native_output_path(&canonical.runtime),
            canonical.native_library,
        );
        layout.push(
            self.config.native_output_path(&other.runtime),
            other.native_library,
        );

        self.reporter.section("Writing");
        let files = layout.write_to(output_dir)?;
        for file in &files {
            self.reporter.success(&format!(
                "{} ({} bytes, sha256 {})",
                file.relative_path,
                file.size,
                file.sha256.short()
            ));
        }
        tracing::info!("Merged {} files into {}", files.len(), output_dir.display());

        Ok(MergeReport {
            canonical_runtime,
            runtimes,
            managed_mismatch: managed_difference.is_some(),
            managed_difference,
            patch: patched.summary,
            files,
        })
    }

    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<u8>, PipelineError> {
        tracing::info!("Fetching {} from {}", source.runtime, source.url);
        self.fetcher
            .fetch(&source.url, &source.runtime, &self.reporter)
            .await
            .map_err(|e| PipelineError::Fetch {
                runtime: source.runtime.clone(),
                source: e,
            })
    }

    fn read(
        &self,
        reader: &ArchiveReader<'_>,
        archive: &[u8],
        runtime: &RuntimeId,
    ) -> Result<PackageContents, PipelineError> {
        let contents = reader
            .read(archive, runtime)
            .map_err(|source| PipelineError::Archive {
                runtime: runtime.clone(),
                source,
            })?;
        self.reporter.info(&format!(
            "{runtime}: license {} B, managed {} B, native {} B",
            contents.license.len(),
            contents.managed_library.len(),
            contents.native_library.len()
        ));
        Ok(contents)
    }
}

/// Caller has already established that the blobs differ.
fn difference_of(
    a: &PackageContents,
    b: &PackageContents,
    role: EntryRole,
) -> Difference {
    verify::describe_difference(a, b, role).unwrap_or(Difference {
        offset: 0,
        left_len: a.get(role).len(),
        right_len: b.get(role).len(),
    })
}
