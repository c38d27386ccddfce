//! PE header facts around the metadata rewrite: the optional header
//! checksum and the two signature kinds a rewrite invalidates.

use goblin::pe::PE;

use super::PatchError;

/// `CheckSum` offset within the optional header.
const CHECKSUM_FIELD: usize = 64;
/// `PE\0\0` signature plus the COFF file header.
const OPTIONAL_HEADER_START: usize = 4 + 20;
/// `Flags` offset within the CLI header.
const CLI_FLAGS_FIELD: u32 = 16;
/// `COMIMAGE_FLAGS_STRONGNAMESIGNED`
const STRONG_NAME_SIGNED: u32 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PeFacts {
    /// Stored optional header checksum; zero means "not computed".
    pub checksum: u32,
    pub checksum_offset: usize,
    pub strong_name_signed: bool,
    pub has_certificate: bool,
}

impl PeFacts {
    pub fn inspect(image: &[u8]) -> Result<Self, PatchError> {
        let pe = PE::parse(image).map_err(|e| PatchError::Malformed(e.to_string()))?;
        let Some(optional) = pe.header.optional_header.as_ref() else {
            return Err(PatchError::Malformed("missing optional header".to_string()));
        };
        let directories = &optional.data_directories;

        let cli_rva = directories
            .get_clr_runtime_header()
            .as_ref()
            .map(|d| d.virtual_address)
            .filter(|&rva| rva != 0)
            .ok_or_else(|| PatchError::Malformed("not a managed image".to_string()))?;
        let flags = rva_to_offset(&pe, cli_rva + CLI_FLAGS_FIELD)
            .and_then(|offset| read_u32(image, offset))
            .ok_or_else(|| PatchError::Malformed("CLI header outside any section".to_string()))?;

        let has_certificate = directories
            .get_certificate_table()
            .as_ref()
            .is_some_and(|d| d.size != 0);

        Ok(Self {
            checksum: optional.windows_fields.check_sum,
            checksum_offset: pe.header.dos_header.pe_pointer as usize
                + OPTIONAL_HEADER_START
                + CHECKSUM_FIELD,
            strong_name_signed: flags & STRONG_NAME_SIGNED != 0,
            has_certificate,
        })
    }

    pub fn signed(&self) -> bool {
        self.strong_name_signed || self.has_certificate
    }
}

fn rva_to_offset(pe: &PE<'_>, rva: u32) -> Option<usize> {
    pe.sections.iter().find_map(|section| {
        let delta = rva.checked_sub(section.virtual_address)?;
        let extent = section.virtual_size.max(section.size_of_raw_data);
        (delta < extent).then(|| (section.pointer_to_raw_data + delta) as usize)
    })
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Rewrite the optional header checksum of `image` in place.
pub(super) fn refresh_checksum(image: &mut [u8]) -> Result<(), PatchError> {
    let offset = PeFacts::inspect(image)?.checksum_offset;
    let sum = pe_checksum(image, offset);
    image[offset..offset + 4].copy_from_slice(&sum.to_le_bytes());
    Ok(())
}

/// Standard PE image checksum (the `CheckSumMappedFile` algorithm).
pub(super) fn pe_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u64 = 0;
    for (i, chunk) in data.chunks(2).enumerate() {
        let offset = i * 2;
        if offset == checksum_offset || offset == checksum_offset + 2 {
            continue;
        }
        let word = u16::from_le_bytes([chunk[0], chunk.get(1).copied().unwrap_or(0)]);
        sum += u64::from(word);
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum = (sum & 0xffff) + (sum >> 16);
    (sum as u32).wrapping_add(data.len() as u32)
}
