//! Export of a captured image as a loadable file.
//!
//! Images captured from memory are in virtual layout; their section file
//! offsets frequently make no sense on disk while the virtual offsets stay
//! self-consistent. Reconstruction therefore prefers the layout that is
//! actually valid instead of forcing a naive raw-style dump.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::capture::buffer::CapturedImage;
use crate::error::{Error, Result};
use crate::pe::utils::align_up;
use crate::pe::{headers, sections};

// Output files past this are treated as layout garbage, not data.
const MAX_DUMP_SIZE: usize = 0x2000_0000;

/// How a reconstructed dump lays out the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    /// Pick a layout from the section table's validity.
    Auto,
    /// Write the buffer verbatim in its virtual layout.
    Virtual,
    /// Convert the virtual layout back to the raw file layout.
    Unmap,
    /// Rewrite section headers so the raw layout equals the virtual one.
    Realign,
}

/// Best-effort import-table repair against a known exports map.
///
/// Supplied by the collaborator that tracks which exports live where;
/// returns whether the repair fully succeeded plus the imports it could not
/// cover. A failed repair downgrades the dump's fidelity, never aborts it.
pub trait ImportFixer {
    fn fix_imports(&self, image: &mut [u8]) -> (bool, Vec<String>);
}

impl CapturedImage {
    /// Reconstruct the captured image into a loadable file at `path`.
    ///
    /// Requires a structurally parseable buffer. With [`DumpMode::Auto`],
    /// raw and virtual layout validity are checked independently; when only
    /// the virtual layout holds up, a realigned dump is attempted first and
    /// the default reconstruction is retried on failure. Returns the mode
    /// actually used.
    pub fn dump_reconstructed<P: AsRef<Path>>(
        &mut self,
        path: P,
        mode: DumpMode,
        import_fixer: Option<&dyn ImportFixer>,
    ) -> Result<DumpMode> {
        let path = path.as_ref();
        if self.is_empty() {
            return Err(Error::NoBuffer);
        }
        if !self.is_valid_pe() {
            return Err(Error::InvalidPe("unparseable header"));
        }
        debug!("dumping reconstructed image with reloc base {:#x}", self.reloc_base());

        if let Some(fixer) = import_fixer {
            let (ok, not_covered) = fixer.fix_imports(self.bytes_mut());
            if !ok {
                warn!("unable to fix imports");
            }
            if !not_covered.is_empty() {
                debug!(
                    count = not_covered.len(),
                    "imports not covered by the exports map"
                );
            }
        }

        match mode {
            DumpMode::Auto => {
                let raw_ok = sections_alignment_valid(self.bytes(), true);
                let virtual_ok = sections_alignment_valid(self.bytes(), false);
                debug!(raw_ok, virtual_ok, "section layout validity");
                if !raw_ok && virtual_ok {
                    match self.write_as(path, DumpMode::Realign) {
                        Ok(()) => return Ok(DumpMode::Realign),
                        Err(err) => {
                            warn!(error = %err, "realigned dump failed, reverting to default mode");
                        }
                    }
                }
                if self.write_as(path, DumpMode::Unmap).is_ok() {
                    return Ok(DumpMode::Unmap);
                }
                self.write_as(path, DumpMode::Virtual)?;
                Ok(DumpMode::Virtual)
            }
            mode => {
                self.write_as(path, mode)?;
                Ok(mode)
            }
        }
    }

    /// Write the buffer's bytes verbatim; requires only a non-empty buffer,
    /// no structural validity.
    pub fn dump_raw<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.is_empty() {
            return Err(Error::NoBuffer);
        }
        fs::write(path, self.bytes())?;
        Ok(())
    }

    fn write_as(&self, path: &Path, mode: DumpMode) -> Result<()> {
        let out = match mode {
            DumpMode::Virtual => virtual_copy(self.bytes(), self.reloc_base()),
            DumpMode::Realign => realign_headers(self.bytes(), self.reloc_base()),
            // Auto is resolved by the caller; the default reconstruction
            // is the virtual-to-raw conversion.
            DumpMode::Unmap | DumpMode::Auto => virtual_to_raw(self.bytes(), self.reloc_base()),
        }
        .ok_or(Error::InvalidPe("section layout not mappable"))?;
        fs::write(path, out)?;
        Ok(())
    }
}

/// Check the section layout's consistency in the raw (file) or virtual
/// (in-memory) interpretation: starts aligned to the layout's alignment
/// unit, nonzero, non-decreasing, and within the layout's ceiling.
pub fn sections_alignment_valid(data: &[u8], raw: bool) -> bool {
    let alignment = if raw {
        headers::file_alignment(data)
    } else {
        headers::section_alignment(data)
    };
    let Some(alignment) = alignment else {
        return false;
    };
    if alignment == 0 || !alignment.is_power_of_two() {
        return false;
    }
    let Some(table) = sections::parse_section_headers(data) else {
        return false;
    };
    if table.is_empty() {
        return false;
    }
    let cap = if raw {
        MAX_DUMP_SIZE as u64
    } else {
        align_up(data.len(), alignment as usize) as u64
    };
    let mut prev_start = 0u64;
    for section in &table {
        let (start, size) = if raw {
            (section.pointer_to_raw_data, section.size_of_raw_data)
        } else {
            (section.virtual_address, section.virtual_size)
        };
        // uninitialized data has no file presence
        if raw && size == 0 {
            continue;
        }
        let start = u64::from(start);
        if start == 0
            || start % u64::from(alignment) != 0
            || start < prev_start
            || start + u64::from(size) > cap
        {
            return false;
        }
        prev_start = start;
    }
    true
}

// Verbatim copy with the declared image base pointed at the reloc base, so
// absolute addresses in the dump stay self-consistent.
fn virtual_copy(data: &[u8], reloc_base: u64) -> Option<Vec<u8>> {
    let mut out = data.to_vec();
    if !headers::set_image_base(&mut out, reloc_base) {
        return None;
    }
    Some(out)
}

// Copy each section's bytes from its virtual offset back to its raw file
// offset. Sections reaching past the captured arena are copied as far as
// the arena holds them.
fn virtual_to_raw(data: &[u8], reloc_base: u64) -> Option<Vec<u8>> {
    let headers_size = (headers::size_of_headers(data)? as usize).min(data.len());
    let table = sections::parse_section_headers(data)?;

    let mut out_size = headers_size;
    for section in &table {
        if section.size_of_raw_data == 0 {
            continue;
        }
        let end = section
            .pointer_to_raw_data
            .checked_add(section.size_of_raw_data)? as usize;
        out_size = out_size.max(end);
    }
    if out_size == 0 || out_size > MAX_DUMP_SIZE {
        return None;
    }

    let mut out = vec![0u8; out_size];
    out[..headers_size].copy_from_slice(&data[..headers_size]);
    for section in &table {
        if section.size_of_raw_data == 0 {
            continue;
        }
        let src_start = section.virtual_address as usize;
        if src_start >= data.len() {
            continue;
        }
        let count = (section.size_of_raw_data as usize).min(data.len() - src_start);
        let dst_start = section.pointer_to_raw_data as usize;
        out[dst_start..dst_start + count].copy_from_slice(&data[src_start..src_start + count]);
    }
    if !headers::set_image_base(&mut out, reloc_base) {
        return None;
    }
    Some(out)
}

// Rewrite every section's raw pointer/size to mirror its virtual layout and
// bump the file alignment to the section alignment, so the buffer itself
// becomes a valid raw file.
fn realign_headers(data: &[u8], reloc_base: u64) -> Option<Vec<u8>> {
    let mut out = data.to_vec();
    let section_alignment = headers::section_alignment(&out)?;
    let count = headers::section_count(&out)? as usize;
    for index in 0..count {
        let Some(view) = sections::SectionView::of_index(&out, index) else {
            break;
        };
        let va = view.virtual_address(&out)?;
        let vsize = view.virtual_size(&out)?;
        if !view.set_raw_pointer(&mut out, va) || !view.set_raw_size(&mut out, vsize) {
            return None;
        }
    }
    if !headers::set_file_alignment(&mut out, section_alignment) {
        return None;
    }
    if !headers::set_image_base(&mut out, reloc_base) {
        return None;
    }
    Some(out)
}
