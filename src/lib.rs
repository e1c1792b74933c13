//! imago — capture, reconstruction and identity classification of PE
//! modules mapped in live processes.
//!
//! The crate reads a module's bytes out of a foreign address space into an
//! owned arena ([`capture::CapturedImage`]), resolving the image size
//! robustly even when the header lies about it, reconstructs the arena into
//! a file-loadable binary, and classifies whether the module's identity
//! diverges from its on-disk original ([`report::classify_mapping`]) — the
//! signature of code injection, hollowing, or path spoofing.
//!
//! Process attach and module enumeration are the caller's concern; the
//! boundary is the [`capture::ProcessMemory`] trait.

pub mod capture;
pub mod error;
pub mod logging;
pub mod pe;
pub mod report;
pub mod signatures;

pub use capture::{CapturedImage, DumpMode, ImportFixer, MemorySnapshot, ProcessMemory};
pub use error::{Error, Result};
pub use report::{classify_mapping, ModuleIdentity, ScanReport, ScanStatus, Verbosity};
