//! Scan status codes and their aggregation rules.

use serde::{Deserialize, Serialize};

use crate::report::report::ScanReport;

/// Outcome classification of a single module scan.
///
/// The order is not a numeric severity: `Error` means the verdict is
/// indeterminate and always takes precedence when statuses are combined,
/// so an unreadable module is never silently reported as clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    Error,
    NotSuspicious,
    Suspicious,
}

impl ScanStatus {
    /// Integer code used in serialized reports.
    pub fn code(self) -> i32 {
        match self {
            ScanStatus::Error => -1,
            ScanStatus::NotSuspicious => 0,
            ScanStatus::Suspicious => 1,
        }
    }

    /// Status of a possibly-missing report; an absent report is an error,
    /// never a clean result.
    pub fn of(report: Option<&ScanReport>) -> ScanStatus {
        match report {
            None => ScanStatus::Error,
            Some(report) => report.status(),
        }
    }

    /// Combine two statuses: `Error` dominates, then `Suspicious`.
    pub fn combine(self, other: ScanStatus) -> ScanStatus {
        use ScanStatus::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Suspicious, _) | (_, Suspicious) => Suspicious,
            (NotSuspicious, NotSuspicious) => NotSuspicious,
        }
    }
}
