//! Output layout: relative paths plus bytes, written under one directory.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use rtmerge_schema::Sha256Hash;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while validating or writing a layout.
#[derive(Error, Debug)]
pub enum LayoutError {
    /// Writing under the output root failed.
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A relative path is unsafe or listed twice.
    #[error("Invalid path in layout: {0}")]
    InvalidPath(String),
}

/// One file of the merged package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// `/`-separated path relative to the output directory.
    pub relative_path: String,
    pub data: Vec<u8>,
}

/// Record of a file that was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenFile {
    pub relative_path: String,
    pub size: u64,
    pub sha256: Sha256Hash,
}

/// The complete set of files to emit, assembled before anything touches disk.
#[derive(Debug, Default, Clone)]
pub struct Layout {
    files: Vec<OutputFile>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, relative_path: impl Into<String>, data: Vec<u8>) {
        self.files.push(OutputFile {
            relative_path: relative_path.into(),
            data,
        });
    }

    pub fn files(&self) -> &[OutputFile] {
        &self.files
    }

    /// Reject absolute paths, `..` and duplicates before any write happens.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let mut seen = std::collections::HashSet::new();
        for file in &self.files {
            let path = Path::new(&file.relative_path);
            let safe = !file.relative_path.is_empty()
                && path
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)));
            if !safe || !seen.insert(file.relative_path.as_str()) {
                return Err(LayoutError::InvalidPath(file.relative_path.clone()));
            }
        }
        Ok(())
    }

    /// Write every file under `root`, creating parent directories as needed.
    pub fn write_to(&self, root: &Path) -> Result<Vec<WrittenFile>, LayoutError> {
        self.validate()?;

        let mut written = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let absolute_path = root.join(&file.relative_path);
            if let Some(parent) = absolute_path.parent() {
                fs::create_dir_all(parent).map_err(|source| LayoutError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&absolute_path, &file.data).map_err(|source| LayoutError::Io {
                path: absolute_path.clone(),
                source,
            })?;

            tracing::debug!(
                "wrote {} ({} bytes)",
                absolute_path.display(),
                file.data.len()
            );
            written.push(WrittenFile {
                relative_path: file.relative_path.clone(),
                size: file.data.len() as u64,
                sha256: Sha256Hash::compute(&file.data),
            });
        }
        Ok(written)
    }
}
