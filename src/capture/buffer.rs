//! Owned capture buffer and the image-size resolution heuristics.

use tracing::{debug, warn};

use crate::capture::process::ProcessMemory;
use crate::error::{Error, Result};
use crate::pe::utils::{align_up, is_padding};
use crate::pe::{headers, sections};
use crate::signatures;

/// Granularity of remote reads and of the size heuristics.
pub const PAGE_SIZE: usize = 0x1000;

// Ceiling for heuristically derived sizes; a foreign header or region query
// claiming more than this is treated as hostile.
const MAX_HEURISTIC_SIZE: u64 = 0x1000_0000;

/// A module's bytes copied out of a foreign address space into an owned,
/// bounds-tracked arena.
///
/// A `CapturedImage` is always non-empty; `reloc_base` starts equal to
/// `module_base` and both survive buffer resizes.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    bytes: Vec<u8>,
    module_base: u64,
    reloc_base: u64,
}

impl CapturedImage {
    /// Read a module image out of `process` at `module_base`.
    ///
    /// With `size_hint == 0` the size is taken from the module's own
    /// remotely-read header. If the direct read fails, the size is
    /// recomputed heuristically and the read retried once; header-declared
    /// sizes are frequently wrong for injected or hollowed modules.
    pub fn acquire(
        process: &dyn ProcessMemory,
        module_base: u64,
        size_hint: usize,
    ) -> Result<CapturedImage> {
        let mut size = size_hint;
        if size == 0 {
            size = remote_declared_size(process, module_base).unwrap_or(0) as usize;
        }
        if let Some(bytes) = read_image(process, module_base, size) {
            return Ok(CapturedImage {
                bytes,
                module_base,
                reloc_base: module_base,
            });
        }
        let size = calc_remote_image_size(process, module_base) as usize;
        warn!(
            "image size at {module_base:#x} undetermined, retrying with calculated size {size:#x}"
        );
        match read_image(process, module_base, size) {
            Some(bytes) => Ok(CapturedImage {
                bytes,
                module_base,
                reloc_base: module_base,
            }),
            None => Err(Error::Unreadable {
                address: module_base,
                wanted: size,
            }),
        }
    }

    /// Wrap bytes captured out-of-band. Rejects an empty buffer.
    pub fn from_bytes(bytes: Vec<u8>, module_base: u64) -> Result<CapturedImage> {
        if bytes.is_empty() {
            return Err(Error::NoBuffer);
        }
        Ok(CapturedImage {
            bytes,
            module_base,
            reloc_base: module_base,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Address the bytes were read from.
    pub fn module_base(&self) -> u64 {
        self.module_base
    }

    /// Address the dump's declared image base is rewritten against.
    pub fn reloc_base(&self) -> u64 {
        self.reloc_base
    }

    /// Point relocations at a base other than where the bytes were read,
    /// e.g. for payloads that were relocated before being written into the
    /// hosting process.
    pub fn set_reloc_base(&mut self, reloc_base: u64) {
        self.reloc_base = reloc_base;
    }

    /// Whether the buffer parses far enough to be treated as an image.
    pub fn is_valid_pe(&self) -> bool {
        headers::verify(&self.bytes)
    }

    /// Reallocate the arena to `new_size`, preserving the common prefix and
    /// both base addresses. Growth zero-fills, shrink truncates.
    ///
    /// Resizing to zero is rejected: an empty buffer and a live capture are
    /// mutually exclusive states.
    pub fn resize_buffer(&mut self, new_size: usize) -> Result<()> {
        if self.bytes.is_empty() || new_size == 0 {
            return Err(Error::NoBuffer);
        }
        self.bytes.resize(new_size, 0);
        Ok(())
    }

    /// Rewrite the declared image size and the last section's virtual/raw
    /// sizes so the layout matches `new_image_size`, without reallocating.
    ///
    /// Fails when `new_image_size` falls below the last section's start, or
    /// when the resulting section would reach past the allocated arena (the
    /// caller must `resize_buffer` first).
    pub fn resize_last_section(&mut self, new_image_size: usize) -> Result<()> {
        if self.bytes.is_empty() {
            return Err(Error::NoBuffer);
        }
        let last = sections::SectionView::last(&self.bytes)
            .ok_or(Error::InvalidPe("no section table"))?;
        let section_start = last
            .virtual_address(&self.bytes)
            .ok_or(Error::InvalidPe("section header out of bounds"))? as usize;

        if new_image_size < section_start {
            return Err(Error::OutOfRange {
                requested: new_image_size,
            });
        }
        let new_section_size = new_image_size - section_start;
        if section_start + new_section_size > self.bytes.len() {
            return Err(Error::OutOfRange {
                requested: new_image_size,
            });
        }

        if !headers::set_image_size(&mut self.bytes, new_image_size as u32) {
            return Err(Error::InvalidPe("optional header out of bounds"));
        }
        if !last.set_virtual_size(&mut self.bytes, new_section_size as u32)
            || !last.set_raw_size(&mut self.bytes, new_section_size as u32)
        {
            return Err(Error::InvalidPe("section header out of bounds"));
        }
        Ok(())
    }
}

/// `SizeOfImage` as declared by the module's own header, read remotely.
pub fn remote_declared_size(process: &dyn ProcessMemory, module_base: u64) -> Option<u32> {
    let mut page = [0u8; PAGE_SIZE];
    let got = process.read_bytes(module_base, &mut page);
    headers::image_size(&page[..got])
}

/// Resolve a module's image size without trusting its header.
///
/// A page at `module_base` is probed for a section table; without one the
/// OS region size is the only available signal. With one, the mapped region
/// is scanned tail-first for the last page that still looks like code or
/// data, falling back to the region size if the scan comes up empty.
pub fn calc_remote_image_size(process: &dyn ProcessMemory, module_base: u64) -> u64 {
    let mut page = [0u8; PAGE_SIZE];
    let got = process.read_bytes(module_base, &mut page);
    let header = &page[..got];

    let Some(first_section) = sections::first_section(header) else {
        let size = process.region_size(module_base);
        debug!("no section table at {module_base:#x}, using region size {size:#x}");
        return size;
    };

    let size = artefact_image_size(process, module_base, first_section.virtual_address as u64);
    if size != 0 {
        size
    } else {
        process.region_size(module_base)
    }
}

// Walk the mapped region tail-first in page windows. Unreadable and
// pure-padding pages shrink the image; the first page that still looks like
// code (signature match) or holds any non-padding data ends it.
fn artefact_image_size(process: &dyn ProcessMemory, module_base: u64, floor: u64) -> u64 {
    let region = process.region_size(module_base).min(MAX_HEURISTIC_SIZE);
    if region == 0 || floor >= region {
        return 0;
    }
    let floor = floor as usize;
    let mut pos = align_up(region as usize, PAGE_SIZE);
    let mut page = [0u8; PAGE_SIZE];

    while pos > floor && pos >= PAGE_SIZE {
        let start = pos - PAGE_SIZE;
        let got = process.read_bytes(module_base + start as u64, &mut page);
        let window = &page[..got];
        if !window.is_empty() {
            let is_content = signatures::is_code(window)
                || window.first().is_some_and(|&b| !is_padding(window, b));
            if is_content {
                return pos as u64;
            }
        }
        pos = start;
    }
    0
}

// Allocate and fill the arena; any short read discards it.
fn read_image(process: &dyn ProcessMemory, module_base: u64, size: usize) -> Option<Vec<u8>> {
    if size == 0 {
        return None;
    }
    let mut bytes = vec![0u8; size];
    let got = process.read_bytes(module_base, &mut bytes);
    if got != size {
        debug!("failed reading full image at {module_base:#x}: wanted {size:#x}, got {got:#x}");
        return None;
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::process::MemorySnapshot;
    use crate::pe::utils::WriteExt;
    use crate::pe::headers::{DOS_SIGNATURE, PE32PLUS_MAGIC, PE_SIGNATURE};
    use crate::pe::SECTION_HEADER_SIZE;

    const BASE: u64 = 0x7FF6_1000_0000;

    // Virtual-layout PE32+ image: headers in the first page, then one page
    // of prologue-studded "code" and one page of data.
    fn make_image(declared_size: u32, real_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; real_size];
        data.write_u16_le_at(0, DOS_SIGNATURE);
        data.write_u32_le_at(60, 0x80);
        data[0x80..0x84].copy_from_slice(&PE_SIGNATURE);
        data.write_u16_le_at(0x84, 0x8664);
        data.write_u16_le_at(0x86, 2);
        data.write_u16_le_at(0x94, 240);
        let opt = 0x98;
        data.write_u16_le_at(opt, PE32PLUS_MAGIC);
        data.write_u64_le_at(opt + 24, BASE);
        data.write_u32_le_at(opt + 32, 0x1000);
        data.write_u32_le_at(opt + 36, 0x200);
        data.write_u32_le_at(opt + 56, declared_size);
        data.write_u32_le_at(opt + 60, 0x400);
        data.write_u32_le_at(opt + 108, 16);
        let table = opt + 240;
        for (i, (name, va, vsize, raw_ptr, raw_size)) in [
            (".text", 0x1000u32, 0x1000u32, 0x400u32, 0x1000u32),
            (".data", 0x2000, 0x1000, 0x1400, 0x1000),
        ]
        .into_iter()
        .enumerate()
        {
            let off = table + i * SECTION_HEADER_SIZE;
            data[off..off + name.len()].copy_from_slice(name.as_bytes());
            data.write_u32_le_at(off + 8, vsize);
            data.write_u32_le_at(off + 12, va);
            data.write_u32_le_at(off + 16, raw_size);
            data.write_u32_le_at(off + 20, raw_ptr);
        }
        if real_size >= 0x2000 {
            for chunk in data[0x1000..0x2000].chunks_mut(16) {
                chunk[..3].copy_from_slice(&[0x55, 0x8B, 0xEC]);
                chunk[3..].fill(0xC3);
            }
        }
        if real_size >= 0x3000 {
            data[0x2000..0x2800].fill(0x41);
        }
        data
    }

    #[test]
    fn test_acquire_with_explicit_size() {
        let image = make_image(0x3000, 0x3000);
        let snap = MemorySnapshot::new(BASE, image.clone());
        let captured = CapturedImage::acquire(&snap, BASE, 0x3000).unwrap();
        assert_eq!(captured.bytes(), &image[..]);
        assert_eq!(captured.module_base(), BASE);
        assert_eq!(captured.reloc_base(), BASE);
        assert!(captured.is_valid_pe());
    }

    #[test]
    fn test_acquire_uses_header_declared_size() {
        let image = make_image(0x3000, 0x3000);
        let snap = MemorySnapshot::new(BASE, image.clone());
        let captured = CapturedImage::acquire(&snap, BASE, 0).unwrap();
        assert_eq!(captured.len(), 0x3000);
        assert_eq!(captured.bytes(), &image[..]);
    }

    #[test]
    fn test_acquire_falls_back_when_header_size_lies() {
        // header claims 16 MiB; the mapping is only 0x3000 bytes
        let image = make_image(0x100_0000, 0x3000);
        let snap = MemorySnapshot::new(BASE, image);
        let captured = CapturedImage::acquire(&snap, BASE, 0).unwrap();
        // the artefact scan finds the data tail in the third page
        assert_eq!(captured.len(), 0x3000);
    }

    #[test]
    fn test_acquire_unreadable() {
        let snap = MemorySnapshot::new(BASE, vec![]);
        let err = CapturedImage::acquire(&snap, BASE, 0x1000).unwrap_err();
        assert!(matches!(err, Error::Unreadable { .. }));
    }

    #[test]
    fn test_calc_size_without_header_uses_region() {
        // a mapping with no parseable PE at its base
        let snap = MemorySnapshot::new(BASE, vec![0xAB; 0x5000]);
        assert_eq!(calc_remote_image_size(&snap, BASE), 0x5000);
    }

    #[test]
    fn test_artefact_scan_trims_padding_tail() {
        // region is 8 pages, but everything past the data page is zero
        let image = make_image(0x8000, 0x8000);
        let snap = MemorySnapshot::new(BASE, image);
        let size = calc_remote_image_size(&snap, BASE);
        assert_eq!(size, 0x3000);
    }

    #[test]
    fn test_resize_buffer_preserves_prefix_and_base() {
        let image = make_image(0x3000, 0x3000);
        let snap = MemorySnapshot::new(BASE, image.clone());
        let mut captured = CapturedImage::acquire(&snap, BASE, 0).unwrap();

        captured.resize_buffer(0x1800).unwrap();
        assert_eq!(captured.len(), 0x1800);
        assert_eq!(captured.bytes(), &image[..0x1800]);
        assert_eq!(captured.module_base(), BASE);
        assert_eq!(captured.reloc_base(), BASE);

        captured.resize_buffer(0x4000).unwrap();
        assert_eq!(captured.len(), 0x4000);
        assert_eq!(&captured.bytes()[..0x1800], &image[..0x1800]);
        assert!(captured.bytes()[0x3000..].iter().all(|&b| b == 0));
        assert_eq!(captured.module_base(), BASE);
    }

    #[test]
    fn test_resize_buffer_to_zero_rejected() {
        let mut captured = CapturedImage::from_bytes(vec![1, 2, 3], BASE).unwrap();
        assert!(matches!(
            captured.resize_buffer(0),
            Err(Error::NoBuffer)
        ));
        assert_eq!(captured.len(), 3);
    }

    #[test]
    fn test_resize_last_section_bounds() {
        // last section is .data at 0x2000 in a 0x3000-byte arena
        let image = make_image(0x3000, 0x3000);
        let mut captured = CapturedImage::from_bytes(image, BASE).unwrap();

        captured.resize_last_section(0x2500).unwrap();
        assert_eq!(headers::image_size(captured.bytes()), Some(0x2500));
        let last = sections::last_section(captured.bytes()).unwrap();
        assert_eq!(last.virtual_size, 0x500);
        assert_eq!(last.size_of_raw_data, 0x500);

        // below the last section's start
        assert!(matches!(
            captured.resize_last_section(0x1000),
            Err(Error::OutOfRange { .. })
        ));
        // past the allocated arena
        assert!(matches!(
            captured.resize_last_section(0x4000),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_from_bytes_rejects_empty() {
        assert!(matches!(
            CapturedImage::from_bytes(vec![], BASE),
            Err(Error::NoBuffer)
        ));
    }
}
