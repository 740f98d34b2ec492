//! Risk scanner port
//!
//! Static inspection of a source unit. Implementations must be pure functions
//! of the bytes: no I/O, bounded time, and a parse failure is a finding.

use serde::Serialize;
use toolgate_domain::{CapabilityDescriptor, RiskVerdict};

/// Everything a scan learns about one source unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub verdict: RiskVerdict,
    /// Present only when the declared binding could be read statically.
    pub descriptor: Option<CapabilityDescriptor>,
}

pub trait RiskScannerPort: Send + Sync {
    /// Scan `source`. When `unit_key` is given, the declared name must equal it.
    fn inspect(&self, source: &[u8], unit_key: Option<&str>) -> ScanReport;

    fn scan(&self, source: &[u8]) -> RiskVerdict {
        self.inspect(source, None).verdict
    }
}
