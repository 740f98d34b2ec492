//! Approval records — immutable ledger entries keyed by content digest.

use super::digest::ContentDigest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `decided_by` value written for auto-approved clean tools.
pub const AUTO_APPROVER: &str = "auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalKind {
    /// Issued by an operator through the approval surface.
    Manual,
    /// Created by the gateway for a clean verdict.
    Automatic,
}

/// One approval decision. Never edited; a content change produces a new
/// digest and therefore needs a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub digest: ContentDigest,
    pub approved_at: DateTime<Utc>,
    pub decided_by: String,
    pub kind: ApprovalKind,
}

impl ApprovalRecord {
    pub fn manual(digest: ContentDigest, decided_by: impl Into<String>) -> Self {
        Self {
            digest,
            approved_at: Utc::now(),
            decided_by: decided_by.into(),
            kind: ApprovalKind::Manual,
        }
    }

    pub fn automatic(digest: ContentDigest) -> Self {
        Self {
            digest,
            approved_at: Utc::now(),
            decided_by: AUTO_APPROVER.to_string(),
            kind: ApprovalKind::Automatic,
        }
    }

    pub fn is_automatic(&self) -> bool {
        self.kind == ApprovalKind::Automatic
    }
}

/// Errors from the approval path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
    #[error("no pending tool has digest {0}")]
    NotPending(String),
    #[error("decided_by must not be blank")]
    BlankDecider,
    #[error("failed to persist approval ledger: {0}")]
    Persist(String),
}
