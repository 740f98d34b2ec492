//! Per-unit admission state machine.
//!
//! ```text
//!  Absent ─▶ Discovered ─▶ Scanned ─┬─▶ PendingApproval ─┐
//!                            ▲      │                    ▼
//!                            │      └──────────────▶ Admitted ─┬─▶ Loaded
//!                            │                               └─▶ Failed
//!                            └──── content change (Loaded / Pending / Failed)
//!
//!  any state ─▶ Absent on removal of the source unit
//! ```

use super::digest::ContentDigest;
use super::verdict::RiskVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionState {
    Absent,
    Discovered,
    Scanned,
    PendingApproval,
    Admitted,
    /// Bound into the registry; the only callable state.
    Loaded,
    /// Approved but the implementation could not be bound.
    Failed,
}

impl AdmissionState {
    pub fn can_transition_to(self, next: AdmissionState) -> bool {
        use AdmissionState::*;
        match (self, next) {
            (_, Absent) => true,
            (Absent, Discovered) => true,
            (Discovered, Scanned) => true,
            (Scanned, PendingApproval) | (Scanned, Admitted) => true,
            (PendingApproval, Admitted) => true,
            (Admitted, Loaded) | (Admitted, Failed) => true,
            (Loaded, Scanned) | (PendingApproval, Scanned) | (Failed, Scanned) => true,
            _ => false,
        }
    }

    pub fn is_callable(self) -> bool {
        self == AdmissionState::Loaded
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionState::Absent => "absent",
            AdmissionState::Discovered => "discovered",
            AdmissionState::Scanned => "scanned",
            AdmissionState::PendingApproval => "pending_approval",
            AdmissionState::Admitted => "admitted",
            AdmissionState::Loaded => "loaded",
            AdmissionState::Failed => "failed",
        }
    }
}

impl fmt::Display for AdmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a unit is not callable. Shown on the approval surface only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum AdmissionIssue {
    /// The source did not parse.
    ScanParseError,
    /// Flagged, and no approval exists for this digest.
    AdmissionDenied,
    /// Approved but the implementation failed to bind.
    LoadFailed { reason: String },
}

/// A flagged unit awaiting an operator decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTool {
    pub name: String,
    pub digest: ContentDigest,
    pub verdict: RiskVerdict,
}

/// Admission status of one source unit, for operator listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub name: String,
    pub state: AdmissionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<ContentDigest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<AdmissionIssue>,
    pub updated_at: DateTime<Utc>,
}
