//! Acquisition of module images from a foreign address space, and their
//! reconstruction into loadable files.

pub mod buffer;
pub mod dump;
pub mod process;

pub use buffer::{calc_remote_image_size, remote_declared_size, CapturedImage, PAGE_SIZE};
pub use dump::{sections_alignment_valid, DumpMode, ImportFixer};
pub use process::{MemorySnapshot, PageProtect, ProcessMemory};
