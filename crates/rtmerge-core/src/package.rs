//! Extracted content of one architecture variant.

use rtmerge_schema::RuntimeId;

/// Logical role of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryRole {
    /// The license file shared by all variants.
    License,
    /// The managed (IL) library shared by all variants.
    ManagedLibrary,
    /// The architecture-specific native library.
    NativeLibrary,
}

impl EntryRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::License => "license",
            Self::ManagedLibrary => "managed library",
            Self::NativeLibrary => "native library",
        }
    }
}

impl std::fmt::Display for EntryRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the merge needs from one upstream package.
///
/// Built once by [`crate::io::archive::ArchiveReader`]; all three blobs are
/// guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageContents {
    /// Architecture the package was fetched for.
    pub runtime: RuntimeId,
    /// License text, compared across variants.
    pub license: Vec<u8>,
    /// Managed assembly, compared across variants and then patched.
    pub managed_library: Vec<u8>,
    /// Native runtime library, fed to the universal binary merge.
    pub native_library: Vec<u8>,
}

impl PackageContents {
    pub fn get(&self, role: EntryRole) -> &[u8] {
        match role {
            EntryRole::License => &self.license,
            EntryRole::ManagedLibrary => &self.managed_library,
            EntryRole::NativeLibrary => &self.native_library,
        }
    }
}
