//! Managed image rewriting.
//!
//! Re-binds the unmanaged imports of a PE/CLI module from the `__Internal`
//! sentinel module to a shipped native library.
//!
//! The metadata edit goes through dotscope: the image is opened as a
//! `CilAssemblyView`, the rows to change are read and validated, and a
//! `CilAssembly` records the new strings and the re-pointed rows before
//! writing the assembly back out. Strings are only ever appended, since an
//! import name is usually shared with the managed method of the same name.

mod assembly;
mod headers;

use dotscope::metadata::tables::{ImplMapRaw, ModuleRefRaw, TableDataOwned, TableId};
use dotscope::CilAssembly;
use rtmerge_schema::MergeConfig;
use serde::Serialize;
use thiserror::Error;

use assembly::{ImportRow, ImportTables, ModuleRefRow, Staged};
use headers::PeFacts;

/// Errors raised while reading or rewriting a managed image.
#[derive(Error, Debug)]
pub enum PatchError {
    /// The image is not a well-formed PE/CLI module.
    #[error("Malformed image: {0}")]
    Malformed(String),

    /// The metadata edit or the write-back failed.
    #[error("Failed to rewrite metadata: {0}")]
    Rewrite(String),

    /// Staging the image for rewriting failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No module reference carries the sentinel name.
    #[error("No module reference named '{0}'")]
    SentinelNotFound(String),

    /// More than one module reference carries the sentinel name.
    #[error("{0} module references share the sentinel name")]
    AmbiguousSentinel(usize),

    /// The image already carries names a previous patch would have written.
    #[error("Image is already patched: '{0}' is present")]
    AlreadyPatched(String),

    /// An import bound to the sentinel lacks the expected prefix.
    #[error("Import '{symbol}' does not start with '{prefix}'")]
    PrefixViolation {
        /// Offending import name.
        symbol: String,
        /// Prefix every bound import must carry.
        prefix: String,
    },
}

fn rewrite_error(err: impl std::fmt::Display) -> PatchError {
    PatchError::Rewrite(err.to_string())
}

/// What to rename and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRules {
    /// Module name the imports are bound to before patching.
    pub sentinel_module: String,
    /// Module name the imports should resolve against afterwards.
    pub target_module: String,
    /// Prefix every rebound import name must start with.
    pub symbol_prefix: String,
    /// Prepended to every rebound import name.
    pub separator: String,
}

impl PatchRules {
    /// Rules for the native library described by `config`.
    pub fn from_config(config: &MergeConfig) -> Self {
        Self {
            sentinel_module: config.patch.sentinel_module.clone(),
            target_module: config.native.module_name().to_string(),
            symbol_prefix: config.patch.symbol_prefix.clone(),
            separator: config.patch.separator.clone(),
        }
    }

    /// Name a bound import carries after patching.
    fn rebound(&self, symbol: &str) -> String {
        format!("{}{symbol}", self.separator)
    }
}

/// One import name rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolRename {
    /// Name before patching.
    pub from: String,
    /// Name after patching.
    pub to: String,
}

/// Record of what a patch changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchSummary {
    /// Previous module name (the sentinel).
    pub module_from: String,
    /// New module name.
    pub module_to: String,
    /// Rewritten import names, in table order.
    pub renamed: Vec<SymbolRename>,
    /// Imports bound to other modules, left as they were.
    pub untouched_imports: usize,
    /// The input carried a strong-name or Authenticode signature that no
    /// longer matches.
    pub signature_invalidated: bool,
}

/// Output of [`MetadataPatcher::patch`].
#[derive(Debug, Clone)]
pub struct PatchedImage {
    /// The rewritten image.
    pub bytes: Vec<u8>,
    /// What changed.
    pub summary: PatchSummary,
}

/// An unmanaged import as recorded in the `ImplMap` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportBinding {
    /// Module the import resolves against.
    pub module: String,
    /// Imported symbol name.
    pub symbol: String,
    /// Managed method or field carrying the import.
    pub member: String,
}

/// Rewrites module and import names in a managed image.
#[derive(Debug, Clone)]
pub struct MetadataPatcher {
    rules: PatchRules,
}

impl MetadataPatcher {
    /// Creates a patcher applying `rules`.
    pub fn new(rules: PatchRules) -> Self {
        Self { rules }
    }

    /// The rules this patcher applies.
    pub fn rules(&self) -> &PatchRules {
        &self.rules
    }

    /// Produce a copy of `image` whose sentinel imports resolve against the
    /// target module.
    ///
    /// # Errors
    ///
    /// Fails without producing output when the image cannot be parsed, the
    /// sentinel is missing or ambiguous, the image is already patched, or any
    /// bound import violates the prefix rule.
    pub fn patch(&self, image: &[u8]) -> Result<PatchedImage, PatchError> {
        let facts = PeFacts::inspect(image)?;
        let staged = Staged::new(image)?;
        let view = staged.view()?;
        let tables = ImportTables::read(&view)?;
        let rules = &self.rules;

        // Validate every bound import before touching anything.
        let sentinel = self.find_sentinel(&tables)?;
        let bound = self.bound_imports(&tables, sentinel.row.rid)?;
        let untouched_imports = tables.imports.len() - bound.len();

        let mut assembly = CilAssembly::new(view);
        let module_name = assembly
            .string_add(&rules.target_module)
            .map_err(rewrite_error)?;
        let module_row = ModuleRefRaw {
            name: module_name.placeholder(),
            ..sentinel.row.clone()
        };
        assembly
            .table_row_update(
                TableId::ModuleRef,
                sentinel.row.rid,
                TableDataOwned::ModuleRef(module_row),
            )
            .map_err(rewrite_error)?;

        let mut renamed = Vec::with_capacity(bound.len());
        for import in bound {
            let new_name = rules.rebound(&import.symbol);
            let symbol = assembly.string_add(&new_name).map_err(rewrite_error)?;
            let row = ImplMapRaw {
                import_name: symbol.placeholder(),
                ..import.row.clone()
            };
            assembly
                .table_row_update(TableId::ImplMap, import.row.rid, TableDataOwned::ImplMap(row))
                .map_err(rewrite_error)?;
            tracing::debug!("Rebound import {} -> {new_name}", import.symbol);
            renamed.push(SymbolRename {
                from: import.symbol.clone(),
                to: new_name,
            });
        }

        let output = staged.output_path();
        assembly.to_file(&output).map_err(rewrite_error)?;
        let mut bytes = std::fs::read(&output)?;
        // A zero checksum means "not computed" and stays that way.
        if facts.checksum != 0 {
            headers::refresh_checksum(&mut bytes)?;
        }

        let signature_invalidated = facts.signed();
        if signature_invalidated {
            tracing::warn!("Patched image carried a signature that is now invalid");
        }

        tracing::info!(
            "Rebound {} import(s) from '{}' to '{}' ({untouched_imports} untouched)",
            renamed.len(),
            rules.sentinel_module,
            rules.target_module
        );

        Ok(PatchedImage {
            bytes,
            summary: PatchSummary {
                module_from: rules.sentinel_module.clone(),
                module_to: rules.target_module.clone(),
                renamed,
                untouched_imports,
                signature_invalidated,
            },
        })
    }

    /// The single `ModuleRef` row holding the sentinel name.
    fn find_sentinel<'t>(&self, tables: &'t ImportTables) -> Result<&'t ModuleRefRow, PatchError> {
        let rules = &self.rules;
        let matches: Vec<&ModuleRefRow> = tables
            .module_refs
            .iter()
            .filter(|m| m.name == rules.sentinel_module)
            .collect();
        let target_present = tables
            .module_refs
            .iter()
            .any(|m| m.name == rules.target_module);

        match matches.as_slice() {
            [row] => Ok(*row),
            [] if target_present => Err(PatchError::AlreadyPatched(rules.target_module.clone())),
            [] => Err(PatchError::SentinelNotFound(rules.sentinel_module.clone())),
            rows => Err(PatchError::AmbiguousSentinel(rows.len())),
        }
    }

    /// Imports scoped to the sentinel row, each checked against the prefix
    /// rule.
    fn bound_imports<'t>(
        &self,
        tables: &'t ImportTables,
        sentinel_rid: u32,
    ) -> Result<Vec<&'t ImportRow>, PatchError> {
        let rules = &self.rules;
        let patched_prefix = rules.rebound(&rules.symbol_prefix);
        let mut bound = Vec::new();
        for import in tables.imports.iter().filter(|i| i.row.import_scope == sentinel_rid) {
            if import.symbol.starts_with(&patched_prefix) {
                return Err(PatchError::AlreadyPatched(import.symbol.clone()));
            }
            if !import.symbol.starts_with(&rules.symbol_prefix) {
                return Err(PatchError::PrefixViolation {
                    symbol: import.symbol.clone(),
                    prefix: rules.symbol_prefix.clone(),
                });
            }
            bound.push(import);
        }
        Ok(bound)
    }
}

/// List every unmanaged import of a managed image.
///
/// # Errors
///
/// Returns an error if the image or its metadata cannot be parsed.
pub fn read_imports(image: &[u8]) -> Result<Vec<ImportBinding>, PatchError> {
    let staged = Staged::new(image)?;
    let view = staged.view()?;
    let tables = ImportTables::read(&view)?;

    tables
        .imports
        .iter()
        .map(|import| -> Result<ImportBinding, PatchError> {
            let module = tables
                .module_ref(import.row.import_scope)
                .ok_or_else(|| {
                    PatchError::Malformed(format!("import {} has no scope", import.row.rid))
                })?;
            Ok(ImportBinding {
                module: module.name.clone(),
                symbol: import.symbol.clone(),
                member: import.member.clone(),
            })
        })
        .collect()
}
