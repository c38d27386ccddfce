//! Merge configuration (`rtmerge.toml`).
//!
//! Every field has a default matching the macOS bindings runtime packages,
//! so an empty file (or no file at all) describes the stock merge.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::RuntimeId;

/// NuGet v2 download endpoint used by the default sources.
pub const NUGET_PACKAGE_ENDPOINT: &str = "https://www.nuget.org/api/v2/package";

/// Upstream runtime package id prefix; the runtime identifier is appended.
pub const DEFAULT_PACKAGE_ID_PREFIX: &str = "Microsoft.macOS.Runtime";

/// Upstream package version merged by default.
pub const DEFAULT_PACKAGE_VERSION: &str = "14.2.9244-net9-p2";

/// Relative path of the license in the emitted layout.
pub const LICENSE_OUTPUT_PATH: &str = "LICENSE";

/// Errors raised while parsing or validating a [`MergeConfig`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The TOML document could not be parsed into the config schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The merge needs exactly two architecture sources.
    #[error("Expected exactly 2 sources, found {0}")]
    WrongSourceCount(usize),

    /// Two sources name the same runtime identifier.
    #[error("Runtime '{0}' is listed more than once")]
    DuplicateRuntime(RuntimeId),

    /// A source URL does not use http or https.
    #[error("Invalid URL '{0}': must start with http:// or https://")]
    InvalidUrl(String),

    /// A file or directory name is empty or would escape its directory.
    #[error("Invalid {field} '{value}'")]
    InvalidName {
        /// Config key holding the bad value.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A required string field is empty.
    #[error("Empty field: {0}")]
    EmptyField(&'static str),

    /// The symbol separator must be a single character.
    #[error("Separator must be exactly one character, got '{0}'")]
    InvalidSeparator(String),

    /// The native module name equals the sentinel it is meant to replace.
    #[error("Native module name '{0}' is the same as the sentinel module")]
    SentinelCollision(String),
}

/// One architecture-specific upstream package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// Runtime identifier used in archive paths and the output layout.
    pub runtime: RuntimeId,
    /// Download URL of the package archive.
    pub url: String,
}

impl SourceConfig {
    /// Source for the default upstream package of `runtime`.
    pub fn nuget(runtime: RuntimeId) -> Self {
        let url = format!(
            "{NUGET_PACKAGE_ENDPOINT}/{DEFAULT_PACKAGE_ID_PREFIX}.{runtime}/{DEFAULT_PACKAGE_VERSION}"
        );
        Self { runtime, url }
    }
}

/// The `[native]` section: naming of the per-architecture native library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NativeConfig {
    /// File name inside `runtimes/<rid>/native/` of the upstream package.
    pub source_name: String,
    /// File name in the emitted layout. Defaults to `source_name`.
    pub output_name: Option<String>,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            source_name: "libxamarin-dotnet-coreclr.dylib".to_string(),
            output_name: None,
        }
    }
}

impl NativeConfig {
    /// File name of the native library in the emitted layout.
    pub fn output_name(&self) -> &str {
        self.output_name.as_deref().unwrap_or(&self.source_name)
    }

    /// Logical module name the managed binary binds to: the output file
    /// name without its extension (`libfoo.dylib` -> `libfoo`).
    pub fn module_name(&self) -> &str {
        let name = self.output_name();
        Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name)
    }
}

/// The `[patch]` section: how unmanaged imports are re-pointed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatchConfig {
    /// Module reference name meaning "resolve against the host image".
    pub sentinel_module: String,
    /// Prefix every re-pointed import name must already carry.
    pub symbol_prefix: String,
    /// Character prepended to each re-pointed import name.
    pub separator: String,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            sentinel_module: "__Internal".to_string(),
            symbol_prefix: "xamarin_".to_string(),
            separator: "_".to_string(),
        }
    }
}

/// Complete description of one merge run.
///
/// The first entry of `sources` is the canonical variant: its license and
/// managed library are the ones emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// Target framework moniker of the managed library (`net9.0`).
    pub target_framework: String,
    /// Archive path of the license file.
    pub license_path: String,
    /// File name of the managed library.
    pub managed_name: String,
    /// Treat a managed-library mismatch between variants as fatal.
    pub strict_managed: bool,
    /// Native library naming.
    pub native: NativeConfig,
    /// Import rewriting rules.
    pub patch: PatchConfig,
    /// The two architecture packages, canonical first.
    pub sources: Vec<SourceConfig>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            target_framework: "net9.0".to_string(),
            license_path: "LICENSE".to_string(),
            managed_name: "Microsoft.macOS.dll".to_string(),
            strict_managed: false,
            native: NativeConfig::default(),
            patch: PatchConfig::default(),
            sources: vec![
                SourceConfig::nuget(RuntimeId::from_static("osx-arm64")),
                SourceConfig::nuget(RuntimeId::from_static("osx-x64")),
            ],
        }
    }
}

impl MergeConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys, and
    /// any error from [`MergeConfig::validate`].
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.len() != 2 {
            return Err(ConfigError::WrongSourceCount(self.sources.len()));
        }
        if self.sources[0].runtime == self.sources[1].runtime {
            return Err(ConfigError::DuplicateRuntime(self.sources[0].runtime.clone()));
        }
        for source in &self.sources {
            if !(source.url.starts_with("https://") || source.url.starts_with("http://")) {
                return Err(ConfigError::InvalidUrl(source.url.clone()));
            }
        }

        check_file_name("target_framework", &self.target_framework)?;
        check_file_name("managed_name", &self.managed_name)?;
        check_file_name("native.source_name", &self.native.source_name)?;
        check_file_name("native.output_name", self.native.output_name())?;
        check_archive_path("license_path", &self.license_path)?;

        if self.patch.sentinel_module.is_empty() {
            return Err(ConfigError::EmptyField("patch.sentinel_module"));
        }
        if self.patch.symbol_prefix.is_empty() {
            return Err(ConfigError::EmptyField("patch.symbol_prefix"));
        }
        if self.patch.separator.chars().count() != 1 {
            return Err(ConfigError::InvalidSeparator(self.patch.separator.clone()));
        }
        if self.native.module_name() == self.patch.sentinel_module {
            return Err(ConfigError::SentinelCollision(
                self.native.module_name().to_string(),
            ));
        }
        Ok(())
    }

    /// The source whose license and managed library are emitted.
    pub fn canonical_source(&self) -> &SourceConfig {
        &self.sources[0]
    }

    /// Archive path of the license.
    pub fn license_entry_path(&self) -> &str {
        &self.license_path
    }

    /// Archive path of the managed library for `runtime`.
    pub fn managed_entry_path(&self, runtime: &RuntimeId) -> String {
        format!(
            "runtimes/{runtime}/lib/{}/{}",
            self.target_framework, self.managed_name
        )
    }

    /// Archive path of the native library for `runtime`.
    pub fn native_entry_path(&self, runtime: &RuntimeId) -> String {
        format!("runtimes/{runtime}/native/{}", self.native.source_name)
    }

    /// Output-relative path of the managed library.
    pub fn managed_output_path(&self) -> String {
        format!("lib/{}/{}", self.target_framework, self.managed_name)
    }

    /// Output-relative path of the native library for `runtime`.
    pub fn native_output_path(&self, runtime: &RuntimeId) -> String {
        format!("runtimes/{runtime}/native/{}", self.native.output_name())
    }
}

fn check_file_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn check_archive_path(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let escapes = value.starts_with('/')
        || value.contains('\\')
        || value.split('/').any(|c| c.is_empty() || c == "." || c == "..");
    if escapes {
        return Err(ConfigError::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
