//! Approval store port
//!
//! The durable, digest-keyed ledger of approval decisions. Implementations own
//! their synchronization; callers share one store by `Arc`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use toolgate_domain::{ApprovalError, ApprovalKind, ApprovalRecord, ContentDigest, RiskVerdict};

pub trait ApprovalStorePort: Send + Sync {
    fn lookup(&self, digest: &ContentDigest) -> Option<ApprovalRecord>;

    /// Persist an approval for `digest`.
    ///
    /// When a record already exists it is returned unchanged and nothing is
    /// written; records are immutable.
    fn record_approval(
        &self,
        digest: ContentDigest,
        decided_by: &str,
        kind: ApprovalKind,
    ) -> Result<ApprovalRecord, ApprovalError>;

    /// All records, oldest first.
    fn records(&self) -> Vec<ApprovalRecord>;

    /// Make sure everything recorded so far is durable.
    fn flush(&self) -> Result<(), ApprovalError> {
        Ok(())
    }

    /// Only a verdict with no risk flags may be approved without an operator.
    fn is_auto_approvable(&self, verdict: &RiskVerdict) -> bool {
        verdict.is_clean()
    }
}

/// Non-durable store for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryApprovalStore {
    records: RwLock<HashMap<ContentDigest, ApprovalRecord>>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApprovalStorePort for InMemoryApprovalStore {
    fn lookup(&self, digest: &ContentDigest) -> Option<ApprovalRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.get(digest).cloned()
    }

    fn record_approval(
        &self,
        digest: ContentDigest,
        decided_by: &str,
        kind: ApprovalKind,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let record = records.entry(digest).or_insert_with(|| match kind {
            ApprovalKind::Automatic => ApprovalRecord::automatic(digest),
            ApprovalKind::Manual => ApprovalRecord::manual(digest, decided_by),
        });
        Ok(record.clone())
    }

    fn records(&self) -> Vec<ApprovalRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by_key(|r| r.approved_at);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_domain::{Finding, PassKind, RiskFlag};

    #[test]
    fn test_record_is_immutable() {
        let store = InMemoryApprovalStore::new();
        let digest = ContentDigest::of(b"tool");
        let first = store
            .record_approval(digest, "alice", ApprovalKind::Manual)
            .unwrap();
        let second = store
            .record_approval(digest, "bob", ApprovalKind::Manual)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.lookup(&digest).unwrap().decided_by, "alice");
    }

    #[test]
    fn test_auto_approvable_only_when_clean() {
        let store = InMemoryApprovalStore::new();
        assert!(store.is_auto_approvable(&RiskVerdict::clean()));
        let flagged = RiskVerdict::from_findings([Finding::new(
            RiskFlag::DynamicEval,
            PassKind::Lexical,
            "load",
        )]);
        assert!(!store.is_auto_approvable(&flagged));
    }
}
