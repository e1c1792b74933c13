//! Module identity and the mapped-path vs on-disk-path classifier.

use std::fs;

use tracing::debug;

use crate::pe::headers;
use crate::report::report::{MappingReport, ModuleInfo, ScanReport};
use crate::report::status::ScanStatus;

const SYSTEM32_SEGMENT: &str = "\\system32\\";
// Same length as "System32", so the rewrite is a drop-in segment swap.
const WOW64_DIR: &str = "SysWOW64";

/// Rewrite the system-directory segment of a path to its 32-bit
/// redirection directory. Paths without the segment come back unchanged.
pub fn wow64_path(path: &str) -> String {
    let lower = path.to_ascii_lowercase();
    match lower.find(SYSTEM32_SEGMENT) {
        Some(index) => {
            let mut out = path.to_string();
            out.replace_range(index + 1..index + 1 + WOW64_DIR.len(), WOW64_DIR);
            out
        }
        None => path.to_string(),
    }
}

/// What is known about one mapped module's identity.
#[derive(Debug, Clone)]
pub struct ModuleIdentity {
    module_base: u64,
    module_size: u64,
    module_file: String,
    mapped_file: String,
    is_dot_net: bool,
    hdr_image_base: u64,
}

impl ModuleIdentity {
    pub fn new(
        module_base: u64,
        module_size: u64,
        module_file: impl Into<String>,
        mapped_file: impl Into<String>,
    ) -> ModuleIdentity {
        ModuleIdentity {
            module_base,
            module_size,
            module_file: module_file.into(),
            mapped_file: mapped_file.into(),
            is_dot_net: false,
            hdr_image_base: 0,
        }
    }

    pub fn module_base(&self) -> u64 {
        self.module_base
    }

    pub fn module_size(&self) -> u64 {
        self.module_size
    }

    /// On-disk path used for original-file lookups.
    pub fn module_file(&self) -> &str {
        &self.module_file
    }

    /// Path the mapping is actually backed by at runtime.
    pub fn mapped_file(&self) -> &str {
        &self.mapped_file
    }

    pub fn is_dot_net(&self) -> bool {
        self.is_dot_net
    }

    /// Image base declared by the original file's header, 0 if unknown.
    pub fn hdr_image_base(&self) -> u64 {
        self.hdr_image_base
    }

    /// Use the WOW64-redirected on-disk path for all further lookups.
    pub fn switch_to_wow64_path(&mut self) {
        self.module_file = wow64_path(&self.module_file);
    }

    /// Fall back to the mapped path as the on-disk identity.
    pub fn switch_to_mapped_path(&mut self) {
        self.module_file = self.mapped_file.clone();
    }

    /// Load descriptive metadata from the original file behind
    /// `module_file`. A missing or unparseable file leaves the metadata
    /// empty and returns false; that is a degraded state, not an error.
    pub fn load_original(&mut self) -> bool {
        let Ok(bytes) = fs::read(&self.module_file) else {
            return false;
        };
        if !headers::verify(&bytes) {
            return false;
        }
        self.is_dot_net = headers::is_dotnet(&bytes);
        self.hdr_image_base = headers::image_base(&bytes).unwrap_or(0);
        true
    }
}

/// Compare a module's mapped identity against its on-disk one.
///
/// Matching paths (directly or through WOW64 redirection) are not
/// suspicious; anything else is module substitution or a spoofed path. The
/// identity is updated in place when the redirected path turns out to be
/// the real one, and falls back to the mapped path as a metadata source
/// when the on-disk original cannot be loaded.
pub fn classify_mapping(identity: &mut ModuleIdentity) -> ScanReport {
    // the report keeps the paths as they were presented, before any switch
    let module_file = identity.module_file.clone();
    let mapped_file = identity.mapped_file.clone();

    let mut is_same = mapped_file.eq_ignore_ascii_case(&module_file);
    if !is_same && !module_file.is_empty() {
        let redirected = wow64_path(&module_file);
        if mapped_file.eq_ignore_ascii_case(&redirected) {
            // legitimate WOW64 mapping, not spoofing
            identity.switch_to_wow64_path();
            is_same = true;
        }
    }

    let mut info = ModuleInfo::new(identity.module_base, identity.module_size, module_file);
    if is_same {
        return ScanReport::MappingMismatch(MappingReport {
            info,
            mapped_file,
            status: ScanStatus::NotSuspicious,
        });
    }

    let mut filled = identity.load_original();
    if !filled {
        debug!(
            module_file = identity.module_file(),
            mapped_file = identity.mapped_file(),
            "failed to load the original module, switching to the mapped path"
        );
        identity.switch_to_mapped_path();
        filled = identity.load_original();
    }
    if filled {
        info.is_dot_net = identity.is_dot_net;
        info.orig_base = identity.hdr_image_base;
    }
    ScanReport::MappingMismatch(MappingReport {
        info,
        mapped_file,
        status: ScanStatus::Suspicious,
    })
}
