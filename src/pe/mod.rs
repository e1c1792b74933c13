//! Minimal PE header and section-table access over owned byte arenas.
//!
//! Captured images come out of a foreign, untrusted address space and are
//! frequently truncated or adversarially shaped, so this layer never
//! reinterprets buffer memory as header structs: every field access is an
//! explicit, bounds-checked offset computation against the arena.

pub mod headers;
pub mod sections;
pub mod utils;

pub use headers::{
    DOS_SIGNATURE, PE32PLUS_MAGIC, PE32_MAGIC, PE_SIGNATURE,
};
pub use sections::{SectionHeader, SectionView, SECTION_HEADER_SIZE};
pub use utils::{align_up, is_padding, ReadExt, WriteExt};
