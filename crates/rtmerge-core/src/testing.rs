//! Synthetic inputs for unit tests: zip archives and minimal PE/CLI images.

use std::collections::HashMap;
use std::io::{Cursor, Write};

use async_trait::async_trait;
use rtmerge_schema::RuntimeId;

use crate::io::download::{FetchError, Fetcher};
use crate::reporter::Reporter;

/// Zip archive holding `entries` in the given order.
pub(crate) fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(name.to_string(), options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Serves canned archives by URL.
#[derive(Default)]
pub(crate) struct StaticFetcher {
    responses: HashMap<String, Vec<u8>>,
}

impl StaticFetcher {
    pub fn with(mut self, url: &str, body: Vec<u8>) -> Self {
        self.responses.insert(url.to_string(), body);
        self
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(
        &self,
        url: &str,
        runtime: &RuntimeId,
        reporter: &dyn Reporter,
    ) -> Result<Vec<u8>, FetchError> {
        let body = self
            .responses
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))?;
        reporter.fetched(runtime, body.len() as u64);
        Ok(body)
    }
}

/// Shape of a synthetic managed image.
#[derive(Debug, Clone)]
pub(crate) struct ImageSpec {
    /// `ModuleRef` names in row order.
    pub module_refs: Vec<String>,
    /// `(import name, 0-based module_refs index)`; import `i` is carried by
    /// method `Import{i}`.
    pub imports: Vec<(String, usize)>,
    /// Minimum `#Strings` heap length before alignment.
    pub pad_strings: usize,
    /// Store a (stale) nonzero optional header checksum.
    pub with_checksum: bool,
    /// Mark the CLI header strong-name signed.
    pub strong_name: bool,
    /// Name each method after its import, sharing the `#Strings` entry.
    pub methods_named_after_imports: bool,
    /// Add `.rsrc` and `.reloc` headers after `.text`, filling the header
    /// area the way a compiler-built AnyCPU DLL does.
    pub extra_sections: bool,
    /// Row count declared for `ImplMap` in place of the real one.
    pub declared_import_rows: Option<u32>,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            module_refs: vec!["__Internal".to_string(), "libSystem.dylib".to_string()],
            imports: vec![
                ("xamarin_init".to_string(), 0),
                ("getpid".to_string(), 1),
                ("xamarin_release".to_string(), 0),
            ],
            pad_strings: 0,
            with_checksum: false,
            strong_name: false,
            methods_named_after_imports: false,
            extra_sections: false,
            declared_import_rows: None,
        }
    }
}

#[derive(Default)]
struct Heap {
    data: Vec<u8>,
}

impl Heap {
    fn add(&mut self, bytes: &[u8]) -> u16 {
        let offset = self.data.len() as u16;
        self.data.extend_from_slice(bytes);
        offset
    }

    fn add_str(&mut self, value: &str) -> u16 {
        let offset = self.add(value.as_bytes());
        self.data.push(0);
        offset
    }

    fn aligned(mut self) -> Vec<u8> {
        self.data.resize(self.data.len().next_multiple_of(4), 0);
        self.data
    }
}

fn push16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Metadata root with `#~`, `#Strings`, `#US`, `#GUID` and `#Blob` streams,
/// laid out back to back. Every index is 2 bytes wide.
pub(crate) fn build_metadata(spec: &ImageSpec) -> Vec<u8> {
    let mut strings = Heap { data: vec![0] };
    let mut blobs = Heap { data: vec![0] };
    let guids = Heap {
        data: (1..=16).collect(),
    };
    let user_strings = Heap { data: vec![0] };

    let module_name = strings.add_str("Fixture.dll");
    let object_name = strings.add_str("Object");
    let system_ns = strings.add_str("System");
    let global_type = strings.add_str("<Module>");
    let native_type = strings.add_str("NativeMethods");
    let fixture_ns = strings.add_str("Fixture");
    let module_ref_names: Vec<u16> = spec.module_refs.iter().map(|m| strings.add_str(m)).collect();
    let import_names: Vec<u16> = spec.imports.iter().map(|(s, _)| strings.add_str(s)).collect();
    let method_names: Vec<u16> = if spec.methods_named_after_imports {
        import_names.clone()
    } else {
        (0..spec.imports.len())
            .map(|i| strings.add_str(&format!("Import{i}")))
            .collect()
    };
    let assembly_name = strings.add_str("Fixture");
    if strings.data.len() < spec.pad_strings {
        let filler = "x".repeat(spec.pad_strings - strings.data.len() - 1);
        strings.add_str(&filler);
    }
    // static void ()
    let signature = blobs.add(&[0x03, 0x00, 0x00, 0x01]);

    let mut rows = Vec::new();
    let mut counts: Vec<(u8, u32)> = Vec::new();

    // Module
    counts.push((0x00, 1));
    push16(&mut rows, 0);
    push16(&mut rows, module_name);
    push16(&mut rows, 1);
    push16(&mut rows, 0);
    push16(&mut rows, 0);

    // TypeRef, scoped to the module
    counts.push((0x01, 1));
    push16(&mut rows, 1 << 2);
    push16(&mut rows, object_name);
    push16(&mut rows, system_ns);

    // TypeDef
    counts.push((0x02, 2));
    for (flags, name, namespace, extends) in [
        (0u32, global_type, 0u16, 0u16),
        (0x0010_0181, native_type, fixture_ns, (1 << 2) | 1),
    ] {
        push32(&mut rows, flags);
        push16(&mut rows, name);
        push16(&mut rows, namespace);
        push16(&mut rows, extends);
        push16(&mut rows, 1);
        push16(&mut rows, 1);
    }

    // MethodDef
    counts.push((0x06, spec.imports.len() as u32));
    for &name in &method_names {
        push32(&mut rows, 0);
        push16(&mut rows, 0x0080);
        push16(&mut rows, 0x2096);
        push16(&mut rows, name);
        push16(&mut rows, signature);
        push16(&mut rows, 1);
    }

    // ModuleRef
    counts.push((0x1a, spec.module_refs.len() as u32));
    for &name in &module_ref_names {
        push16(&mut rows, name);
    }

    // ImplMap, forwarded to MethodDef rows
    counts.push((
        0x1c,
        spec.declared_import_rows.unwrap_or(spec.imports.len() as u32),
    ));
    for (i, (&name, (_, module))) in import_names.iter().zip(&spec.imports).enumerate() {
        push16(&mut rows, 0x0140);
        push16(&mut rows, (((i + 1) << 1) | 1) as u16);
        push16(&mut rows, name);
        push16(&mut rows, (*module + 1) as u16);
    }

    // Assembly
    counts.push((0x20, 1));
    push32(&mut rows, 0x8004);
    for part in [1u16, 0, 0, 0] {
        push16(&mut rows, part);
    }
    push32(&mut rows, 0);
    push16(&mut rows, 0);
    push16(&mut rows, assembly_name);
    push16(&mut rows, 0);

    let mut tables = Vec::new();
    push32(&mut tables, 0);
    tables.extend_from_slice(&[2, 0, 0, 1]);
    let valid = counts.iter().fold(0u64, |mask, &(id, _)| mask | (1 << id));
    tables.extend_from_slice(&valid.to_le_bytes());
    tables.extend_from_slice(&0x0000_1600_3301_fa00u64.to_le_bytes());
    for &(_, count) in &counts {
        push32(&mut tables, count);
    }
    tables.extend_from_slice(&rows);
    let tables = Heap { data: tables }.aligned();

    let streams = [
        ("#~", tables),
        ("#Strings", strings.aligned()),
        ("#US", user_strings.aligned()),
        ("#GUID", guids.aligned()),
        ("#Blob", blobs.aligned()),
    ];

    let version = b"v4.0.30319\0\0";
    let directory_len: usize = streams
        .iter()
        .map(|(name, _)| 8 + (name.len() + 1).next_multiple_of(4))
        .sum();
    let header_len = 16 + version.len() + 4 + directory_len;

    let mut out = Vec::new();
    out.extend_from_slice(b"BSJB");
    push16(&mut out, 1);
    push16(&mut out, 1);
    push32(&mut out, 0);
    push32(&mut out, version.len() as u32);
    out.extend_from_slice(version);
    push16(&mut out, 0);
    push16(&mut out, streams.len() as u16);
    let mut cursor = header_len;
    for (name, data) in &streams {
        push32(&mut out, cursor as u32);
        push32(&mut out, data.len() as u32);
        out.extend_from_slice(name.as_bytes());
        out.resize(out.len() + (name.len() + 1).next_multiple_of(4) - name.len(), 0);
        cursor += data.len();
    }
    for (_, data) in &streams {
        out.extend_from_slice(data);
    }
    out
}

const PE_OFFSET: usize = 0x80;
const OPTIONAL_OFFSET: usize = PE_OFFSET + 24;
const SECTION_TABLE: usize = OPTIONAL_OFFSET + 224;
const FILE_ALIGNMENT: usize = 0x200;
const SECTION_ALIGNMENT: u32 = 0x2000;
const TEXT_RVA: u32 = 0x2000;
const CLI_HEADER_SIZE: usize = 72;

/// PE32 DLL whose `.text` section holds the CLI header followed by the
/// metadata from [`build_metadata`], optionally followed by empty `.rsrc`
/// and `.reloc` sections.
pub(crate) fn build_image(spec: &ImageSpec) -> Vec<u8> {
    let metadata = build_metadata(spec);

    let mut text = vec![0u8; CLI_HEADER_SIZE];
    put32(&mut text, 0, CLI_HEADER_SIZE as u32);
    text[4..8].copy_from_slice(&[2, 0, 5, 0]);
    put32(&mut text, 8, TEXT_RVA + CLI_HEADER_SIZE as u32);
    put32(&mut text, 12, metadata.len() as u32);
    put32(&mut text, 16, if spec.strong_name { 0x09 } else { 0x01 });
    text.extend_from_slice(&metadata);
    if spec.strong_name {
        let signature_rva = TEXT_RVA + text.len() as u32;
        put32(&mut text, 32, signature_rva);
        put32(&mut text, 36, 128);
        text.resize(text.len() + 128, 0);
    }

    // (name, characteristics, contents)
    let mut sections: Vec<(&[u8], u32, Vec<u8>)> = vec![(&b".text"[..], 0x6000_0020, text)];
    if spec.extra_sections {
        sections.push((&b".rsrc"[..], 0x4000_0040, vec![0u8; 0x40]));
        sections.push((&b".reloc"[..], 0x4200_0040, vec![0u8; 0x0c]));
    }

    let mut image = vec![0u8; FILE_ALIGNMENT];
    image[..2].copy_from_slice(b"MZ");
    put32(&mut image, 0x3c, PE_OFFSET as u32);
    image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

    let coff = PE_OFFSET + 4;
    image[coff..coff + 2].copy_from_slice(&0x014cu16.to_le_bytes());
    image[coff + 2..coff + 4].copy_from_slice(&(sections.len() as u16).to_le_bytes());
    image[coff + 16..coff + 18].copy_from_slice(&224u16.to_le_bytes());
    image[coff + 18..coff + 20].copy_from_slice(&0x2102u16.to_le_bytes());

    let mut rva = TEXT_RVA;
    let mut raw_offset = FILE_ALIGNMENT;
    let mut header = SECTION_TABLE;
    let mut initialized_data = 0u32;
    let mut body = Vec::new();
    for (name, characteristics, contents) in &sections {
        let virtual_size = contents.len() as u32;
        let raw_size = contents.len().next_multiple_of(FILE_ALIGNMENT);
        image[header..header + name.len()].copy_from_slice(name);
        put32(&mut image, header + 8, virtual_size);
        put32(&mut image, header + 12, rva);
        put32(&mut image, header + 16, raw_size as u32);
        put32(&mut image, header + 20, raw_offset as u32);
        put32(&mut image, header + 36, *characteristics);
        if characteristics & 0x40 != 0 {
            initialized_data += raw_size as u32;
        }

        body.extend_from_slice(contents);
        body.resize(raw_offset + raw_size - FILE_ALIGNMENT, 0);
        rva += virtual_size.next_multiple_of(SECTION_ALIGNMENT);
        raw_offset += raw_size;
        header += 40;
    }
    assert!(header <= FILE_ALIGNMENT, "section table overflows the headers");

    let opt = OPTIONAL_OFFSET;
    let code_size = sections[0].2.len().next_multiple_of(FILE_ALIGNMENT) as u32;
    image[opt..opt + 2].copy_from_slice(&0x010bu16.to_le_bytes());
    put32(&mut image, opt + 4, code_size);
    put32(&mut image, opt + 8, initialized_data);
    put32(&mut image, opt + 20, TEXT_RVA);
    put32(&mut image, opt + 28, 0x1000_0000);
    put32(&mut image, opt + 32, SECTION_ALIGNMENT);
    put32(&mut image, opt + 36, FILE_ALIGNMENT as u32);
    put32(&mut image, opt + 56, rva);
    put32(&mut image, opt + 60, FILE_ALIGNMENT as u32);
    if spec.with_checksum {
        put32(&mut image, opt + 64, 0x0001_2345);
    }
    image[opt + 68..opt + 70].copy_from_slice(&3u16.to_le_bytes());
    put32(&mut image, opt + 92, 16);
    let cli_directory = opt + 96 + 14 * 8;
    put32(&mut image, cli_directory, TEXT_RVA);
    put32(&mut image, cli_directory + 4, CLI_HEADER_SIZE as u32);

    image.extend_from_slice(&body);
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_sections_fill_the_header_area() {
        let spec = ImageSpec {
            extra_sections: true,
            ..ImageSpec::default()
        };
        let image = build_image(&spec);
        assert_eq!(u16::from_le_bytes([image[PE_OFFSET + 6], image[PE_OFFSET + 7]]), 3);
        // Three headers end at 0x1f0; a fourth would run past SizeOfHeaders.
        assert_eq!(SECTION_TABLE + 3 * 40, 0x1f0);
        assert_eq!(&image[SECTION_TABLE + 80..SECTION_TABLE + 86], b".reloc");
    }
}
