//! The contract with the process-attach layer, and region protection helpers.

use bitflags::bitflags;

/// Read access to a foreign process's address space.
///
/// Implemented by the attach/enumeration layer (excluded from this crate);
/// [`MemorySnapshot`] provides an offline implementation for captures taken
/// out-of-band.
pub trait ProcessMemory {
    /// Copy up to `out.len()` bytes from `address` into `out`, returning the
    /// number of bytes actually copied. A short or zero count means the range
    /// was partially or wholly unmapped; implementations never panic on bad
    /// addresses.
    fn read_bytes(&self, address: u64, out: &mut [u8]) -> usize;

    /// OS-reported size of the memory allocation backing `address`, counted
    /// from `address` to the end of the allocation. 0 when unknown.
    fn region_size(&self, address: u64) -> u64;
}

/// An owned, offline address-space slice at a fixed base.
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    base: u64,
    bytes: Vec<u8>,
}

impl MemorySnapshot {
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ProcessMemory for MemorySnapshot {
    fn read_bytes(&self, address: u64, out: &mut [u8]) -> usize {
        let Some(offset) = address.checked_sub(self.base) else {
            return 0;
        };
        if offset >= self.bytes.len() as u64 {
            return 0;
        }
        let offset = offset as usize;
        let count = out.len().min(self.bytes.len() - offset);
        out[..count].copy_from_slice(&self.bytes[offset..offset + count]);
        count
    }

    fn region_size(&self, address: u64) -> u64 {
        let Some(offset) = address.checked_sub(self.base) else {
            return 0;
        };
        (self.bytes.len() as u64).saturating_sub(offset)
    }
}

bitflags! {
    /// Page protection word as reported by the OS memory query.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageProtect: u32 {
        const NOACCESS = 0x01;
        const READONLY = 0x02;
        const READWRITE = 0x04;
        const WRITECOPY = 0x08;
        const EXECUTE = 0x10;
        const EXECUTE_READ = 0x20;
        const EXECUTE_READWRITE = 0x40;
        const EXECUTE_WRITECOPY = 0x80;
    }
}

// Region state and mapping-kind words from the same query.
pub const MEM_COMMIT: u32 = 0x1000;
pub const MEM_PRIVATE: u32 = 0x2_0000;
pub const MEM_MAPPED: u32 = 0x4_0000;
pub const MEM_IMAGE: u32 = 0x100_0000;

/// Any executable protection variant.
pub fn is_executable(protect: PageProtect) -> bool {
    protect.intersects(
        PageProtect::EXECUTE
            | PageProtect::EXECUTE_READ
            | PageProtect::EXECUTE_READWRITE
            | PageProtect::EXECUTE_WRITECOPY,
    )
}

/// Plain readable (non-executable) protection.
pub fn is_readable(protect: PageProtect) -> bool {
    protect.intersects(PageProtect::READONLY | PageProtect::READWRITE)
}

/// A committed region of an ordinary mapping kind that is marked no-access.
pub fn is_normal_inaccessible(state: u32, kind: u32, protect: PageProtect) -> bool {
    if state & MEM_COMMIT == 0 {
        return false;
    }
    if kind != MEM_IMAGE && kind != MEM_MAPPED && kind != MEM_PRIVATE {
        return false;
    }
    protect.contains(PageProtect::NOACCESS)
}
