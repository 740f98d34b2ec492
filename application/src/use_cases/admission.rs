//! Admission use case: drives each source unit through the state machine.
//!
//! ```text
//! refresh(key) ─▶ read unit ─┬─ gone ─────────────────────────────▶ Absent
//!                            └─ bytes ─▶ same digest? ─ yes ─▶ Unchanged
//!                                            │ no
//!                                            ▼
//!                          withdraw old entry, scan, look up ledger
//!                                            │
//!                   approved or clean ───────┼──────── flagged, no record
//!                          ▼                              ▼
//!                  load ─▶ Loaded | Failed          PendingApproval
//! ```
//!
//! All transitions for one unit run under that unit's lane lock, so two
//! reloads of the same name never interleave. Different units use different
//! lanes and proceed independently. No lock is held while a tool runs: the
//! execution path only ever sees `Arc` snapshots from the registry.

use super::registry::{RegistryEntry, ToolRegistry};
use crate::ports::approval_store::ApprovalStorePort;
use crate::ports::audit_log::{AdmissionAuditLog, AdmissionEvent};
use crate::ports::risk_scanner::{RiskScannerPort, ScanReport};
use crate::ports::source_directory::SourceDirectoryPort;
use crate::ports::tool_loader::{LoadError, ToolLoaderPort};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use toolgate_domain::{
    AUTO_APPROVER, AdmissionIssue, AdmissionState, ApprovalError, ApprovalKind, ContentDigest,
    PendingTool, RiskFlag, RiskVerdict, SourceUnit, UnitStatus,
};
use tracing::{debug, info, warn};

/// Result of one admission transition, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    Loaded {
        name: String,
        digest: ContentDigest,
        approval: ApprovalKind,
    },
    Pending {
        name: String,
        digest: ContentDigest,
        verdict: RiskVerdict,
    },
    Failed {
        name: String,
        digest: ContentDigest,
        reason: String,
    },
    /// Same digest as the current state; nothing to do.
    Unchanged { name: String },
    Removed { name: String },
    /// Nothing known and nothing on disk.
    Absent { name: String },
}

impl AdmissionOutcome {
    pub fn name(&self) -> &str {
        match self {
            AdmissionOutcome::Loaded { name, .. }
            | AdmissionOutcome::Pending { name, .. }
            | AdmissionOutcome::Failed { name, .. }
            | AdmissionOutcome::Unchanged { name }
            | AdmissionOutcome::Removed { name }
            | AdmissionOutcome::Absent { name } => name,
        }
    }
}

/// Bytes and scan result held for a unit awaiting approval, so an approval
/// binds exactly what was reviewed.
#[derive(Clone)]
struct PendingSnapshot {
    unit: SourceUnit,
    report: ScanReport,
}

struct UnitRecord {
    state: AdmissionState,
    digest: Option<ContentDigest>,
    issue: Option<AdmissionIssue>,
    pending: Option<PendingSnapshot>,
    updated_at: DateTime<Utc>,
}

impl UnitRecord {
    fn new() -> Self {
        Self {
            state: AdmissionState::Absent,
            digest: None,
            issue: None,
            pending: None,
            updated_at: Utc::now(),
        }
    }
}

pub struct AdmissionController {
    scanner: Arc<dyn RiskScannerPort>,
    approvals: Arc<dyn ApprovalStorePort>,
    loader: Arc<dyn ToolLoaderPort>,
    source: Arc<dyn SourceDirectoryPort>,
    audit: Arc<dyn AdmissionAuditLog>,
    registry: Arc<ToolRegistry>,
    units: Mutex<HashMap<String, UnitRecord>>,
    lanes: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl AdmissionController {
    pub fn new(
        scanner: Arc<dyn RiskScannerPort>,
        approvals: Arc<dyn ApprovalStorePort>,
        loader: Arc<dyn ToolLoaderPort>,
        source: Arc<dyn SourceDirectoryPort>,
        audit: Arc<dyn AdmissionAuditLog>,
    ) -> Self {
        Self {
            scanner,
            approvals,
            loader,
            source,
            audit,
            registry: Arc::new(ToolRegistry::new()),
            units: Mutex::new(HashMap::new()),
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn approvals(&self) -> &Arc<dyn ApprovalStorePort> {
        &self.approvals
    }

    // ==================== Transitions ====================

    /// Re-read unit `key` and move it to whatever state its current bytes warrant.
    pub async fn refresh(&self, key: &str) -> AdmissionOutcome {
        let lane = self.lane(key);
        let guard = lane.lock().await;

        let outcome = match self.source.read(key) {
            Ok(Some(unit)) => self.admit_unit(unit),
            Ok(None) => self.remove_locked(key),
            Err(e) => {
                warn!(tool = %key, error = %e, "Source unit unreadable, treating as removed");
                self.remove_locked(key)
            }
        };
        drop(guard);

        if matches!(
            outcome,
            AdmissionOutcome::Removed { .. } | AdmissionOutcome::Absent { .. }
        ) {
            self.prune_lane(key, &lane);
        }
        outcome
    }

    /// Reconcile every unit on disk and drop every known unit that is gone.
    pub async fn reconcile(&self) -> Vec<AdmissionOutcome> {
        let present = match self.source.list_keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Could not list tool directory; keeping current state");
                return Vec::new();
            }
        };

        let mut outcomes = join_all(present.iter().map(|key| self.refresh(key))).await;

        let present: HashSet<&String> = present.iter().collect();
        let stale: Vec<String> = self
            .units()
            .keys()
            .filter(|k| !present.contains(k))
            .cloned()
            .collect();
        for key in stale {
            outcomes.push(self.refresh(&key).await);
        }
        outcomes
    }

    /// Record an operator approval for a pending digest and load that unit.
    pub async fn approve(
        &self,
        digest: &str,
        decided_by: &str,
    ) -> Result<AdmissionOutcome, ApprovalError> {
        let digest: ContentDigest = digest
            .trim()
            .parse()
            .map_err(|_| ApprovalError::InvalidDigest(digest.to_string()))?;
        let decided_by = decided_by.trim();
        if decided_by.is_empty() {
            return Err(ApprovalError::BlankDecider);
        }

        if let Some(name) = self.loaded_key_for(digest) {
            debug!(tool = %name, digest = %digest.short(), "Digest already loaded; approval is a no-op");
            return Ok(AdmissionOutcome::Unchanged { name });
        }

        let key = self
            .pending_key_for(digest)
            .ok_or_else(|| ApprovalError::NotPending(digest.short()))?;
        let lane = self.lane(&key);
        let guard = lane.lock().await;

        // The unit may have changed while we waited for its lane.
        let snapshot = self
            .units()
            .get(&key)
            .and_then(|r| r.pending.clone())
            .filter(|p| p.unit.digest() == digest);
        let Some(snapshot) = snapshot else {
            drop(guard);
            if !self.units().contains_key(&key) {
                self.prune_lane(&key, &lane);
            }
            return Err(ApprovalError::NotPending(digest.short()));
        };

        let record = self
            .approvals
            .record_approval(digest, decided_by, ApprovalKind::Manual)?;
        info!(
            tool = %key,
            digest = %digest.short(),
            decided_by = %record.decided_by,
            "Approved pending tool"
        );
        self.audit.record(AdmissionEvent::approved(
            key.as_str(),
            &record,
            &snapshot.report.verdict,
        ));

        Ok(self.bind(&snapshot.unit, &snapshot.report, ApprovalKind::Manual))
    }

    // ==================== Queries ====================

    pub fn pending(&self) -> Vec<PendingTool> {
        let units = self.units();
        let mut pending: Vec<PendingTool> = units
            .iter()
            .filter_map(|(key, record)| {
                let snapshot = record.pending.as_ref()?;
                Some(PendingTool {
                    name: key.clone(),
                    digest: snapshot.unit.digest(),
                    verdict: snapshot.report.verdict.clone(),
                })
            })
            .collect();
        pending.sort_by(|a, b| a.name.cmp(&b.name));
        pending
    }

    pub fn status(&self) -> Vec<UnitStatus> {
        let units = self.units();
        let mut status: Vec<UnitStatus> = units
            .iter()
            .map(|(key, record)| UnitStatus {
                name: key.clone(),
                state: record.state,
                digest: record.digest,
                issue: record.issue.clone(),
                updated_at: record.updated_at,
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name));
        status
    }

    pub fn state_of(&self, key: &str) -> AdmissionState {
        self.units()
            .get(key)
            .map(|r| r.state)
            .unwrap_or(AdmissionState::Absent)
    }

    // ==================== Internals ====================

    fn units(&self) -> std::sync::MutexGuard<'_, HashMap<String, UnitRecord>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lane(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(lanes.entry(key.to_string()).or_default())
    }

    /// Forget the lane of a gone unit unless another refresh holds a handle to it.
    fn prune_lane(&self, key: &str, lane: &Arc<AsyncMutex<()>>) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        // One handle in the map, one in `lane`.
        let idle = lanes
            .get(key)
            .is_some_and(|held| Arc::ptr_eq(held, lane) && Arc::strong_count(lane) == 2);
        if idle {
            lanes.remove(key);
        }
    }

    fn loaded_key_for(&self, digest: ContentDigest) -> Option<String> {
        self.units()
            .iter()
            .find(|(_, r)| r.state == AdmissionState::Loaded && r.digest == Some(digest))
            .map(|(k, _)| k.clone())
    }

    fn pending_key_for(&self, digest: ContentDigest) -> Option<String> {
        self.units()
            .iter()
            .find(|(_, r)| r.pending.as_ref().is_some_and(|p| p.unit.digest() == digest))
            .map(|(k, _)| k.clone())
    }

    fn transition(&self, key: &str, next: AdmissionState, digest: Option<ContentDigest>) {
        let mut units = self.units();
        let record = units.entry(key.to_string()).or_insert_with(UnitRecord::new);
        if !record.state.can_transition_to(next) {
            warn!(tool = %key, from = %record.state, to = %next, "Unexpected admission transition");
        }
        record.state = next;
        if digest.is_some() {
            record.digest = digest;
        }
        record.updated_at = Utc::now();
    }

    fn admit_unit(&self, unit: SourceUnit) -> AdmissionOutcome {
        let key = unit.key().to_string();
        let digest = unit.digest();

        let current = self
            .units()
            .get(&key)
            .map(|r| (r.state, r.digest));
        if let Some((state, Some(known))) = current
            && known == digest
            && matches!(
                state,
                AdmissionState::Loaded | AdmissionState::PendingApproval | AdmissionState::Failed
            )
        {
            return AdmissionOutcome::Unchanged { name: key };
        }

        // Changed content never keeps running on the old approval.
        if let Some(previous) = self.registry.remove(&key) {
            info!(
                tool = %key,
                old = %previous.digest.short(),
                new = %digest.short(),
                "Tool content changed; withdrawn pending re-admission"
            );
        }
        if current.is_none() {
            self.transition(&key, AdmissionState::Discovered, Some(digest));
        }
        {
            let mut units = self.units();
            if let Some(record) = units.get_mut(&key) {
                record.pending = None;
                record.issue = None;
            }
        }

        let report = self.scanner.inspect(unit.content(), Some(&key));
        self.transition(&key, AdmissionState::Scanned, Some(digest));
        debug!(
            tool = %key,
            digest = %digest.short(),
            flags = %report.verdict.flag_list(),
            "Scanned tool source"
        );

        if let Some(record) = self.approvals.lookup(&digest) {
            return self.bind(&unit, &report, record.kind);
        }

        if self.approvals.is_auto_approvable(&report.verdict) {
            match self
                .approvals
                .record_approval(digest, AUTO_APPROVER, ApprovalKind::Automatic)
            {
                Ok(_) => self
                    .audit
                    .record(AdmissionEvent::auto_approved(key.as_str(), digest)),
                Err(e) => warn!(
                    tool = %key,
                    error = %e,
                    "Could not persist auto-approval; admitting on clean verdict"
                ),
            }
            return self.bind(&unit, &report, ApprovalKind::Automatic);
        }

        self.hold_pending(unit, report)
    }

    fn hold_pending(&self, unit: SourceUnit, report: ScanReport) -> AdmissionOutcome {
        let key = unit.key().to_string();
        let digest = unit.digest();
        let issue = if report.verdict.has(RiskFlag::ParseError) {
            AdmissionIssue::ScanParseError
        } else {
            AdmissionIssue::AdmissionDenied
        };

        self.transition(&key, AdmissionState::PendingApproval, Some(digest));
        let verdict = report.verdict.clone();
        {
            let mut units = self.units();
            if let Some(record) = units.get_mut(&key) {
                record.issue = Some(issue);
                record.pending = Some(PendingSnapshot { unit, report });
            }
        }

        info!(
            tool = %key,
            digest = %digest.short(),
            flags = %verdict.flag_list(),
            "Tool flagged; awaiting approval"
        );
        self.audit
            .record(AdmissionEvent::pending(key.as_str(), digest, &verdict));

        AdmissionOutcome::Pending {
            name: key,
            digest,
            verdict,
        }
    }

    fn bind(&self, unit: &SourceUnit, report: &ScanReport, approval: ApprovalKind) -> AdmissionOutcome {
        let key = unit.key().to_string();
        let digest = unit.digest();
        self.transition(&key, AdmissionState::Admitted, Some(digest));

        let loaded = match &report.descriptor {
            Some(descriptor) if descriptor.name == key => self
                .loader
                .load(unit, descriptor)
                .map(|callable| (descriptor.clone(), callable)),
            Some(_) => Err(LoadError::Other(
                "declared name does not match its source unit".to_string(),
            )),
            None => Err(LoadError::MissingDescriptor),
        };

        match loaded {
            Ok((descriptor, callable)) => {
                self.registry.insert(RegistryEntry {
                    descriptor,
                    digest,
                    callable,
                    admitted_at: Utc::now(),
                    approval,
                });
                self.transition(&key, AdmissionState::Loaded, Some(digest));
                {
                    let mut units = self.units();
                    if let Some(record) = units.get_mut(&key) {
                        record.pending = None;
                        record.issue = None;
                    }
                }
                info!(tool = %key, digest = %digest.short(), ?approval, "Tool loaded");
                self.audit
                    .record(AdmissionEvent::loaded(key.as_str(), digest, approval));
                AdmissionOutcome::Loaded {
                    name: key,
                    digest,
                    approval,
                }
            }
            Err(e) => {
                let reason = e.to_string();
                self.transition(&key, AdmissionState::Failed, Some(digest));
                {
                    let mut units = self.units();
                    if let Some(record) = units.get_mut(&key) {
                        record.pending = None;
                        record.issue = Some(AdmissionIssue::LoadFailed {
                            reason: reason.clone(),
                        });
                    }
                }
                warn!(tool = %key, digest = %digest.short(), error = %reason, "Tool failed to load");
                self.audit.record(AdmissionEvent::load_failed(
                    key.as_str(),
                    digest,
                    reason.as_str(),
                ));
                AdmissionOutcome::Failed {
                    name: key,
                    digest,
                    reason,
                }
            }
        }
    }

    fn remove_locked(&self, key: &str) -> AdmissionOutcome {
        let unregistered = self.registry.remove(key).is_some();
        let known = self.units().remove(key).is_some();
        if unregistered || known {
            info!(tool = %key, "Tool source removed");
            self.audit.record(AdmissionEvent::removed(key));
            AdmissionOutcome::Removed {
                name: key.to_string(),
            }
        } else {
            AdmissionOutcome::Absent {
                name: key.to_string(),
            }
        }
    }
}
