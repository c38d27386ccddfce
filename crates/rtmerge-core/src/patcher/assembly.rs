//! Loading managed images through dotscope and reading the rows the patcher
//! works on.

use std::path::PathBuf;

use dotscope::metadata::tables::{FieldRaw, ImplMapRaw, MethodDefRaw, ModuleRefRaw, TableId};
use dotscope::CilAssemblyView;
use tempfile::TempDir;

use super::PatchError;

/// A managed image copied to a scratch directory, since dotscope reads and
/// writes assemblies by path.
pub(super) struct Staged {
    dir: TempDir,
    input: PathBuf,
}

impl Staged {
    pub fn new(image: &[u8]) -> Result<Self, PatchError> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("input.dll");
        std::fs::write(&input, image)?;
        Ok(Self { dir, input })
    }

    pub fn view(&self) -> Result<CilAssemblyView, PatchError> {
        CilAssemblyView::from_path(&self.input).map_err(|e| PatchError::Malformed(e.to_string()))
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.path().join("output.dll")
    }
}

/// A `ModuleRef` row and its resolved name.
#[derive(Debug, Clone)]
pub(super) struct ModuleRefRow {
    pub row: ModuleRefRaw,
    pub name: String,
}

/// An `ImplMap` row with its names resolved.
#[derive(Debug, Clone)]
pub(super) struct ImportRow {
    pub row: ImplMapRaw,
    pub symbol: String,
    pub member: String,
}

/// Owned copy of the rows the patcher reads, detached from the view so the
/// view can be handed to a `CilAssembly` afterwards.
#[derive(Debug, Clone, Default)]
pub(super) struct ImportTables {
    pub module_refs: Vec<ModuleRefRow>,
    pub imports: Vec<ImportRow>,
}

impl ImportTables {
    pub fn read(view: &CilAssemblyView) -> Result<Self, PatchError> {
        let tables = view
            .tables()
            .ok_or_else(|| PatchError::Malformed("no #~ stream".to_string()))?;
        let strings = view
            .strings()
            .ok_or_else(|| PatchError::Malformed("no #Strings heap".to_string()))?;
        let name = |index: u32| {
            strings
                .get(index as usize)
                .map(str::to_string)
                .map_err(|e| PatchError::Malformed(format!("string {index:#x}: {e}")))
        };

        let mut module_refs = Vec::new();
        if let Some(table) = tables.table::<ModuleRefRaw>() {
            for row in table.iter() {
                module_refs.push(ModuleRefRow {
                    name: name(row.name)?,
                    row: row.clone(),
                });
            }
        }

        let methods: Vec<MethodDefRaw> = tables
            .table::<MethodDefRaw>()
            .map(|t| t.iter().map(|row| row.clone()).collect())
            .unwrap_or_default();
        let fields: Vec<FieldRaw> = tables
            .table::<FieldRaw>()
            .map(|t| t.iter().map(|row| row.clone()).collect())
            .unwrap_or_default();

        let mut imports = Vec::new();
        if let Some(table) = tables.table::<ImplMapRaw>() {
            for row in table.iter() {
                let forwarded = &row.member_forwarded;
                let member_name = match forwarded.tag {
                    TableId::MethodDef => methods
                        .iter()
                        .find(|m| m.rid == forwarded.row)
                        .map(|m| m.name),
                    TableId::Field => fields.iter().find(|f| f.rid == forwarded.row).map(|f| f.name),
                    _ => None,
                }
                .ok_or_else(|| {
                    PatchError::Malformed(format!(
                        "import {} forwards to missing member {:?} {}",
                        row.rid, forwarded.tag, forwarded.row
                    ))
                })?;
                imports.push(ImportRow {
                    symbol: name(row.import_name)?,
                    member: name(member_name)?,
                    row: row.clone(),
                });
            }
        }

        let found = Self {
            module_refs,
            imports,
        };
        found.check_scopes()?;
        Ok(found)
    }

    fn check_scopes(&self) -> Result<(), PatchError> {
        for import in &self.imports {
            if self.module_ref(import.row.import_scope).is_none() {
                return Err(PatchError::Malformed(format!(
                    "import {} refers to module reference {}",
                    import.row.rid, import.row.import_scope
                )));
            }
        }
        Ok(())
    }

    /// `ModuleRef` row with the given 1-based row id.
    pub fn module_ref(&self, rid: u32) -> Option<&ModuleRefRow> {
        self.module_refs.iter().find(|m| m.row.rid == rid)
    }
}
