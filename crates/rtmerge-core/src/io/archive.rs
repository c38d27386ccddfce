//! Role-based extraction from package archives.
//!
//! A runtime package is a zip (nupkg) archive. Only three entries matter to
//! the merge, located by exact relative path; everything else is skipped.

use std::io::{self, Cursor, Read};

use rtmerge_schema::{MergeConfig, RuntimeId};
use thiserror::Error;
use zip::ZipArchive;

use crate::package::{EntryRole, PackageContents};

/// Largest up-front buffer reserved from an entry's declared size.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Errors raised while reading a package archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A required entry is absent.
    #[error("{runtime}: {role} not found at '{path}'")]
    MissingEntry {
        runtime: RuntimeId,
        role: EntryRole,
        path: String,
    },

    /// A required entry is present but holds no bytes.
    #[error("{runtime}: {role} at '{path}' is empty")]
    EmptyEntry {
        runtime: RuntimeId,
        role: EntryRole,
        path: String,
    },

    /// Two entries carry the same path.
    #[error("{role} appears more than once at '{path}'")]
    DuplicateEntry { role: EntryRole, path: String },

    /// The decompressed length disagrees with the archive directory.
    #[error("Entry '{path}' declares {expected} bytes but yielded {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
}

/// Exact archive paths of the three entries for one runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPaths {
    license: String,
    managed: String,
    native: String,
}

impl EntryPaths {
    /// Paths given explicitly, mostly for tests.
    pub fn new(
        license: impl Into<String>,
        managed: impl Into<String>,
        native: impl Into<String>,
    ) -> Self {
        Self {
            license: license.into(),
            managed: managed.into(),
            native: native.into(),
        }
    }

    /// Paths `config` assigns to `runtime`.
    pub fn for_runtime(config: &MergeConfig, runtime: &RuntimeId) -> Self {
        Self::new(
            config.license_entry_path(),
            config.managed_entry_path(runtime),
            config.native_entry_path(runtime),
        )
    }

    /// Archive path of `role`.
    pub fn path(&self, role: EntryRole) -> &str {
        match role {
            EntryRole::License => &self.license,
            EntryRole::ManagedLibrary => &self.managed,
            EntryRole::NativeLibrary => &self.native,
        }
    }

    fn role_of(&self, entry_path: &str) -> Option<EntryRole> {
        [
            EntryRole::License,
            EntryRole::ManagedLibrary,
            EntryRole::NativeLibrary,
        ]
        .into_iter()
        .find(|role| self.path(*role) == entry_path)
    }
}

/// Result of a single scan: each role is present or observably absent.
#[derive(Debug)]
pub struct ExtractedEntries {
    runtime: RuntimeId,
    paths: EntryPaths,
    license: Option<Vec<u8>>,
    managed: Option<Vec<u8>>,
    native: Option<Vec<u8>>,
}

impl ExtractedEntries {
    fn new(runtime: RuntimeId, paths: EntryPaths) -> Self {
        Self {
            runtime,
            paths,
            license: None,
            managed: None,
            native: None,
        }
    }

    fn slot(&mut self, role: EntryRole) -> &mut Option<Vec<u8>> {
        match role {
            EntryRole::License => &mut self.license,
            EntryRole::ManagedLibrary => &mut self.managed,
            EntryRole::NativeLibrary => &mut self.native,
        }
    }

    /// Bytes of `role`, or `None` if the archive lacks it.
    pub fn get(&self, role: EntryRole) -> Option<&[u8]> {
        match role {
            EntryRole::License => self.license.as_deref(),
            EntryRole::ManagedLibrary => self.managed.as_deref(),
            EntryRole::NativeLibrary => self.native.as_deref(),
        }
    }

    /// Require all three entries to be present and non-empty.
    pub fn into_contents(mut self) -> Result<PackageContents, ArchiveError> {
        let license = self.take_required(EntryRole::License)?;
        let managed_library = self.take_required(EntryRole::ManagedLibrary)?;
        let native_library = self.take_required(EntryRole::NativeLibrary)?;
        Ok(PackageContents {
            runtime: self.runtime,
            license,
            managed_library,
            native_library,
        })
    }

    fn take_required(&mut self, role: EntryRole) -> Result<Vec<u8>, ArchiveError> {
        match self.slot(role).take() {
            None => Err(ArchiveError::MissingEntry {
                runtime: self.runtime.clone(),
                role,
                path: self.paths.path(role).to_string(),
            }),
            Some(data) if data.is_empty() => Err(ArchiveError::EmptyEntry {
                runtime: self.runtime.clone(),
                role,
                path: self.paths.path(role).to_string(),
            }),
            Some(data) => Ok(data),
        }
    }
}

/// Reads the license, managed and native entries out of a package archive.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveReader<'a> {
    config: &'a MergeConfig,
}

impl<'a> ArchiveReader<'a> {
    /// Reader locating entries by the paths in `config`.
    pub fn new(config: &'a MergeConfig) -> Self {
        Self { config }
    }

    /// Scan the archive once and collect whichever entries are present.
    pub fn extract(
        &self,
        archive_bytes: &[u8],
        runtime: &RuntimeId,
    ) -> Result<ExtractedEntries, ArchiveError> {
        let paths = EntryPaths::for_runtime(self.config, runtime);
        extract_entries(archive_bytes, runtime.clone(), paths)
    }

    /// Extract and require every entry.
    pub fn read(
        &self,
        archive_bytes: &[u8],
        runtime: &RuntimeId,
    ) -> Result<PackageContents, ArchiveError> {
        self.extract(archive_bytes, runtime)?.into_contents()
    }
}

/// Single pass over all file entries, in whatever order the archive stores them.
pub fn extract_entries(
    archive_bytes: &[u8],
    runtime: RuntimeId,
    paths: EntryPaths,
) -> Result<ExtractedEntries, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(archive_bytes))?;
    let mut extracted = ExtractedEntries::new(runtime, paths);

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let Some(role) = extracted.paths.role_of(file.name()) else {
            continue;
        };
        let entry_path = file.name().to_string();
        if extracted.get(role).is_some() {
            return Err(ArchiveError::DuplicateEntry {
                role,
                path: entry_path,
            });
        }

        let expected = file.size();
        let reserve = usize::try_from(expected.min(MAX_PREALLOCATION)).unwrap_or(0);
        let mut data = Vec::with_capacity(reserve);
        file.read_to_end(&mut data)?;
        if data.len() as u64 != expected {
            return Err(ArchiveError::SizeMismatch {
                path: entry_path,
                expected,
                actual: data.len() as u64,
            });
        }

        tracing::debug!(
            "{}: extracted {role} '{entry_path}' ({} bytes)",
            extracted.runtime,
            data.len()
        );
        *extracted.slot(role) = Some(data);
    }

    Ok(extracted)
}
