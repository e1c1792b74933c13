//! Shared helpers for integration tests: a small builder producing
//! virtual-layout PE32+ images of known shape.

use imago::pe::headers::{DOS_SIGNATURE, PE32PLUS_MAGIC, PE_SIGNATURE};
use imago::pe::utils::WriteExt;
use imago::pe::SECTION_HEADER_SIZE;

pub const NT_OFFSET: usize = 0x80;
pub const OPT_OFFSET: usize = NT_OFFSET + 24;
pub const TABLE_OFFSET: usize = OPT_OFFSET + 240;

/// One section: (name, virtual address, virtual size, raw pointer, raw size).
pub type SectionSpec = (&'static str, u32, u32, u32, u32);

/// Build a PE32+ image in virtual layout. Sections named `.text` are filled
/// with 32-bit function prologues followed by `ret`; everything else gets a
/// recognizable per-section fill byte derived from its virtual address.
pub fn build_virtual_image(sections: &[SectionSpec], image_base: u64) -> Vec<u8> {
    let image_size = sections
        .iter()
        .map(|&(_, va, vsize, _, _)| (va + vsize) as usize)
        .max()
        .unwrap_or(0x1000)
        .next_multiple_of(0x1000);
    let mut data = vec![0u8; image_size];

    data.write_u16_le_at(0, DOS_SIGNATURE);
    data.write_u32_le_at(60, NT_OFFSET as u32);
    data[NT_OFFSET..NT_OFFSET + 4].copy_from_slice(&PE_SIGNATURE);
    data.write_u16_le_at(NT_OFFSET + 4, 0x8664);
    data.write_u16_le_at(NT_OFFSET + 6, sections.len() as u16);
    data.write_u16_le_at(NT_OFFSET + 20, 240);

    data.write_u16_le_at(OPT_OFFSET, PE32PLUS_MAGIC);
    data.write_u64_le_at(OPT_OFFSET + 24, image_base);
    data.write_u32_le_at(OPT_OFFSET + 32, 0x1000); // section alignment
    data.write_u32_le_at(OPT_OFFSET + 36, 0x200); // file alignment
    data.write_u32_le_at(OPT_OFFSET + 56, image_size as u32);
    data.write_u32_le_at(OPT_OFFSET + 60, 0x400); // size of headers
    data.write_u32_le_at(OPT_OFFSET + 108, 16); // rva-and-sizes count

    for (i, &(name, va, vsize, raw_ptr, raw_size)) in sections.iter().enumerate() {
        let off = TABLE_OFFSET + i * SECTION_HEADER_SIZE;
        data[off..off + name.len()].copy_from_slice(name.as_bytes());
        data.write_u32_le_at(off + 8, vsize);
        data.write_u32_le_at(off + 12, va);
        data.write_u32_le_at(off + 16, raw_size);
        data.write_u32_le_at(off + 20, raw_ptr);
    }

    for &(name, va, vsize, _, _) in sections {
        let start = va as usize;
        let end = start + vsize as usize;
        if name == ".text" {
            for chunk in data[start..end].chunks_mut(16) {
                let n = chunk.len().min(3);
                chunk[..n].copy_from_slice(&[0x55, 0x8B, 0xEC][..n]);
                if chunk.len() > 3 {
                    chunk[3..].fill(0xC3);
                }
            }
        } else {
            data[start..end].fill((va >> 12) as u8);
        }
    }
    data
}

/// Overwrite a section's raw pointer with a value that cannot be a valid
/// file offset, leaving the virtual layout intact.
pub fn break_raw_layout(data: &mut [u8], section_index: usize) {
    let off = TABLE_OFFSET + section_index * SECTION_HEADER_SIZE;
    data.write_u32_le_at(off + 20, 0x13); // unaligned, mid-header
}
