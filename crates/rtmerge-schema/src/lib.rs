//! Shared types and configuration format for rtmerge.
//!
//! `rtmerge` folds two architecture-specific runtime packages into one
//! redistributable layout. This crate holds the pieces both the core
//! pipeline and the CLI need to agree on: runtime identifiers, content
//! digests and the merge configuration.

pub mod config;
pub mod hash;
pub mod runtime;

// Re-exports
pub use config::{
    ConfigError, LICENSE_OUTPUT_PATH, MergeConfig, NativeConfig, PatchConfig, SourceConfig,
};
pub use hash::Sha256Hash;
pub use runtime::{InvalidRuntimeId, RuntimeId};
