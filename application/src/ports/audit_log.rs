//! Port for the admission audit trail.
//!
//! Records every admission decision (auto-approval, pending, manual approval,
//! load, load failure, removal) in a machine-readable log. This is separate
//! from the `tracing` diagnostics, which are for humans.

use serde::Serialize;
use toolgate_domain::{
    AUTO_APPROVER, ApprovalKind, ApprovalRecord, ContentDigest, Finding, RiskFlag, RiskVerdict,
};

/// One admission decision, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdmissionEvent {
    /// A clean verdict was recorded in the ledger without an operator.
    AutoApproved {
        tool: String,
        digest: ContentDigest,
        decided_by: String,
    },
    /// The scan flagged the source; it waits for a manual approval.
    Pending {
        tool: String,
        digest: ContentDigest,
        flags: Vec<RiskFlag>,
        findings: Vec<Finding>,
    },
    /// An operator approved a pending digest.
    Approved {
        tool: String,
        digest: ContentDigest,
        decided_by: String,
        flags: Vec<RiskFlag>,
    },
    /// The tool entered the registry.
    Loaded {
        tool: String,
        digest: ContentDigest,
        approval: ApprovalKind,
    },
    /// Admission passed but the loader rejected the source.
    LoadFailed {
        tool: String,
        digest: ContentDigest,
        reason: String,
    },
    /// The source unit disappeared.
    Removed { tool: String },
}

impl AdmissionEvent {
    pub fn auto_approved(tool: impl Into<String>, digest: ContentDigest) -> Self {
        Self::AutoApproved {
            tool: tool.into(),
            digest,
            decided_by: AUTO_APPROVER.to_string(),
        }
    }

    pub fn pending(tool: impl Into<String>, digest: ContentDigest, verdict: &RiskVerdict) -> Self {
        Self::Pending {
            tool: tool.into(),
            digest,
            flags: verdict.flags().iter().copied().collect(),
            findings: verdict.findings().to_vec(),
        }
    }

    /// Built from the ledger record so the log shows who decided.
    pub fn approved(tool: impl Into<String>, record: &ApprovalRecord, verdict: &RiskVerdict) -> Self {
        Self::Approved {
            tool: tool.into(),
            digest: record.digest,
            decided_by: record.decided_by.clone(),
            flags: verdict.flags().iter().copied().collect(),
        }
    }

    pub fn loaded(tool: impl Into<String>, digest: ContentDigest, approval: ApprovalKind) -> Self {
        Self::Loaded {
            tool: tool.into(),
            digest,
            approval,
        }
    }

    pub fn load_failed(
        tool: impl Into<String>,
        digest: ContentDigest,
        reason: impl Into<String>,
    ) -> Self {
        Self::LoadFailed {
            tool: tool.into(),
            digest,
            reason: reason.into(),
        }
    }

    pub fn removed(tool: impl Into<String>) -> Self {
        Self::Removed { tool: tool.into() }
    }

    /// The `type` tag written to the log.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AutoApproved { .. } => "auto_approved",
            Self::Pending { .. } => "pending",
            Self::Approved { .. } => "approved",
            Self::Loaded { .. } => "loaded",
            Self::LoadFailed { .. } => "load_failed",
            Self::Removed { .. } => "removed",
        }
    }

    pub fn tool(&self) -> &str {
        match self {
            Self::AutoApproved { tool, .. }
            | Self::Pending { tool, .. }
            | Self::Approved { tool, .. }
            | Self::Loaded { tool, .. }
            | Self::LoadFailed { tool, .. }
            | Self::Removed { tool } => tool,
        }
    }

    pub fn digest(&self) -> Option<ContentDigest> {
        match self {
            Self::AutoApproved { digest, .. }
            | Self::Pending { digest, .. }
            | Self::Approved { digest, .. }
            | Self::Loaded { digest, .. }
            | Self::LoadFailed { digest, .. } => Some(*digest),
            Self::Removed { .. } => None,
        }
    }
}

/// Implementations write each event as one record. Logging is synchronous and
/// infallible from the caller's side; write failures are dropped.
pub trait AdmissionAuditLog: Send + Sync {
    fn record(&self, event: AdmissionEvent);
}

/// No-op implementation for tests and when auditing is disabled.
pub struct NoAuditLog;

impl AdmissionAuditLog for NoAuditLog {
    fn record(&self, _event: AdmissionEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_domain::PassKind;

    #[test]
    fn test_pending_carries_verdict() {
        let digest = ContentDigest::of(b"os.execute('x')");
        let verdict = RiskVerdict::from_findings(vec![Finding::new(
            RiskFlag::ProcessSpawn,
            PassKind::Structural,
            "os.execute",
        )]);

        let event = AdmissionEvent::pending("fetch", digest, &verdict);
        assert_eq!(event.kind(), "pending");
        assert_eq!(event.tool(), "fetch");
        assert_eq!(event.digest(), Some(digest));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "pending");
        assert_eq!(json["digest"], digest.to_hex());
        assert_eq!(json["flags"][0], serde_json::to_value(RiskFlag::ProcessSpawn).unwrap());
        assert_eq!(json["findings"][0]["detail"], "os.execute");
    }

    #[test]
    fn test_approved_takes_decider_from_record() {
        let digest = ContentDigest::of(b"body");
        let record = ApprovalRecord::manual(digest, "alice");
        let event = AdmissionEvent::approved("fetch", &record, &RiskVerdict::default());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "approved");
        assert_eq!(json["decided_by"], "alice");
        assert_eq!(json["flags"], serde_json::json!([]));
    }

    #[test]
    fn test_auto_approval_names_the_auto_decider() {
        let event = AdmissionEvent::auto_approved("greet", ContentDigest::of(b"x"));
        match &event {
            AdmissionEvent::AutoApproved { decided_by, .. } => assert_eq!(decided_by, AUTO_APPROVER),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(AdmissionEvent::removed("gone").digest(), None);
    }
}
