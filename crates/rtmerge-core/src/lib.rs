pub mod io;
pub mod package;
pub mod patcher;
pub mod pipeline;
pub mod verify;

pub mod reporter;

#[cfg(test)]
mod testing;

pub use io::archive::{ArchiveError, ArchiveReader};
#[cfg(feature = "network")]
pub use io::download::HttpFetcher;
pub use io::download::{FetchError, Fetcher};
pub use package::{EntryRole, PackageContents};
pub use patcher::{MetadataPatcher, PatchError, PatchRules, PatchSummary, PatchedImage};
pub use pipeline::{MergeReport, PackagePipeline, PipelineError};
pub use reporter::{NullReporter, Reporter};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("rtmerge-core/", env!("CARGO_PKG_VERSION"));
