//! Per-module classification and the serializable report model.

pub mod mapping;
#[allow(clippy::module_inception)]
pub mod report;
pub mod status;

pub use mapping::{classify_mapping, wow64_path, ModuleIdentity};
pub use report::{MappingReport, ModuleInfo, ScanReport, Verbosity};
pub use status::ScanStatus;
