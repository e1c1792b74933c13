//! The closed set of per-module scan reports and their JSON rendering.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::report::status::ScanStatus;

/// How much detail a rendered report carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verbosity {
    Basic,
    Extended,
}

/// Metadata shared by every report kind.
///
/// Zero/empty fields mean "unknown" and are omitted from the rendered
/// report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Base address the module is (or was) mapped at.
    pub module: u64,
    pub module_size: u64,
    /// On-disk path of the module, as far as it is known.
    pub module_file: String,
    /// Base the reconstructed dump's relocations refer to; reported only
    /// when it differs from the mapped base.
    pub reloc_base: u64,
    /// Image base declared by the original file's header.
    pub orig_base: u64,
    pub is_dot_net: bool,
}

impl ModuleInfo {
    pub fn new(module: u64, module_size: u64, module_file: impl Into<String>) -> ModuleInfo {
        ModuleInfo {
            module,
            module_size,
            module_file: module_file.into(),
            reloc_base: module,
            orig_base: 0,
            is_dot_net: false,
        }
    }
}

/// Result of comparing a module's mapped identity against its on-disk one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingReport {
    pub info: ModuleInfo,
    /// Path the mapping is actually backed by at runtime.
    pub mapped_file: String,
    pub status: ScanStatus,
}

/// A per-module scan verdict.
///
/// Closed set: new kinds extend the enum and the match arms below, checked
/// exhaustively at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScanReport {
    /// The module could not be read or opened at all.
    Unreachable(ModuleInfo),
    /// Deliberately excluded by scan policy.
    Skipped(ModuleInfo),
    /// The mapped or on-disk header does not parse.
    MalformedHeader(ModuleInfo),
    /// Path-identity comparison result (either outcome).
    MappingMismatch(MappingReport),
}

impl ScanReport {
    pub fn unreachable(module: u64, module_size: u64, module_file: impl Into<String>) -> ScanReport {
        ScanReport::Unreachable(ModuleInfo::new(module, module_size, module_file))
    }

    pub fn skipped(module: u64, module_size: u64, module_file: impl Into<String>) -> ScanReport {
        ScanReport::Skipped(ModuleInfo::new(module, module_size, module_file))
    }

    pub fn malformed_header(
        module: u64,
        module_size: u64,
        module_file: impl Into<String>,
    ) -> ScanReport {
        ScanReport::MalformedHeader(ModuleInfo::new(module, module_size, module_file))
    }

    /// Key the rendered report is nested under.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanReport::Unreachable(_) => "unreachable_scan",
            ScanReport::Skipped(_) => "skipped_scan",
            ScanReport::MalformedHeader(_) => "malformed_header",
            ScanReport::MappingMismatch(_) => "mapping_scan",
        }
    }

    /// The status each kind carries; only the mapping comparison varies.
    pub fn status(&self) -> ScanStatus {
        match self {
            ScanReport::Unreachable(_) => ScanStatus::Error,
            ScanReport::Skipped(_) => ScanStatus::NotSuspicious,
            ScanReport::MalformedHeader(_) => ScanStatus::Suspicious,
            ScanReport::MappingMismatch(report) => report.status,
        }
    }

    pub fn info(&self) -> &ModuleInfo {
        match self {
            ScanReport::Unreachable(info)
            | ScanReport::Skipped(info)
            | ScanReport::MalformedHeader(info) => info,
            ScanReport::MappingMismatch(report) => &report.info,
        }
    }

    /// Render the report as a JSON fragment nested under its kind name,
    /// for inclusion in a larger, externally assembled document.
    ///
    /// Fields are emitted only when non-empty/non-zero; the status is
    /// always present as its integer code.
    pub fn to_json(&self, verbosity: Verbosity) -> Value {
        let info = self.info();
        let mut fields = Map::new();
        fields.insert("status".into(), json!(self.status().code()));
        if info.module != 0 {
            fields.insert("module".into(), json!(format!("{:x}", info.module)));
            if info.module_size != 0 {
                fields.insert(
                    "module_size".into(),
                    json!(format!("{:x}", info.module_size)),
                );
            }
        }
        if verbosity == Verbosity::Extended && info.orig_base != 0 {
            fields.insert(
                "original_base".into(),
                json!(format!("{:x}", info.orig_base)),
            );
        }
        if info.reloc_base != 0 && info.reloc_base != info.module {
            fields.insert("reloc_base".into(), json!(format!("{:x}", info.reloc_base)));
        }
        if !info.module_file.is_empty() {
            fields.insert("module_file".into(), json!(info.module_file));
        }
        if info.is_dot_net {
            fields.insert("is_dot_net".into(), json!("1"));
        }
        if let ScanReport::MappingMismatch(report) = self {
            if !report.mapped_file.is_empty() {
                fields.insert("mapped_file".into(), json!(report.mapped_file));
            }
        }
        let mut wrapper = Map::new();
        wrapper.insert(self.kind().to_string(), Value::Object(fields));
        Value::Object(wrapper)
    }
}
