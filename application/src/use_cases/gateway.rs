//! Tool gateway: the surface the rest of the system talks to.
//!
//! Admission side: [`reconcile`](ToolGateway::reconcile), the watcher-fed
//! [`run_event_loop`](ToolGateway::run_event_loop), and the operator-facing
//! [`list_pending`](ToolGateway::list_pending) / [`approve`](ToolGateway::approve).
//!
//! Invocation side: [`call`](ToolGateway::call) and
//! [`call_batch`](ToolGateway::call_batch). A call resolves its name to a
//! registry snapshot, filters the arguments against that snapshot's
//! descriptor, and hands both to the [`ExecutionWrapper`].

use super::admission::{AdmissionController, AdmissionOutcome};
use super::execution::ExecutionWrapper;
use crate::ports::source_directory::SourceEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use toolgate_domain::{
    ApprovalError, CapabilityDescriptor, ExecutionResult, FailureKind, InputFilter, PendingTool,
    StrictInputFilter, UnitStatus,
};
use tracing::{debug, error, info, warn};

/// One entry of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

pub struct ToolGateway {
    admission: AdmissionController,
    filter: Box<dyn InputFilter>,
    executor: ExecutionWrapper,
}

impl ToolGateway {
    pub fn new(admission: AdmissionController, executor: ExecutionWrapper) -> Self {
        Self {
            admission,
            filter: Box::new(StrictInputFilter),
            executor,
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn InputFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    // ==================== Admission surface ====================

    /// Descriptors of loaded tools only.
    pub fn list_tools(&self) -> Vec<CapabilityDescriptor> {
        self.admission.registry().descriptors()
    }

    pub fn list_pending(&self) -> Vec<PendingTool> {
        self.admission.pending()
    }

    pub fn status(&self) -> Vec<UnitStatus> {
        self.admission.status()
    }

    pub async fn approve(&self, digest: &str, decided_by: &str) -> Result<(), ApprovalError> {
        self.admission.approve(digest, decided_by).await.map(|_| ())
    }

    pub async fn reconcile(&self) -> Vec<AdmissionOutcome> {
        let outcomes = self.admission.reconcile().await;
        let stats = self.admission.registry().stats();
        info!(
            loaded = stats.loaded,
            pending = self.admission.pending().len(),
            "Reconciled tool directory"
        );
        outcomes
    }

    /// Consume watcher events until the channel closes or `shutdown` fires.
    ///
    /// Each touched unit is refreshed on its own task; the unit's lane lock
    /// keeps refreshes of one name in order while other names run alongside.
    pub async fn run_event_loop(
        self: Arc<Self>,
        mut events: mpsc::Receiver<SourceEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(SourceEvent::Touched(key)) => {
                        let gateway = Arc::clone(&self);
                        tokio::spawn(async move {
                            let outcome = gateway.admission.refresh(&key).await;
                            debug!(tool = %outcome.name(), ?outcome, "Applied source event");
                        });
                    }
                    Some(SourceEvent::Rescan) => {
                        self.reconcile().await;
                    }
                    None => break,
                },
            }
        }
        debug!("Source event loop stopped");
    }

    /// Make approvals durable before the process exits.
    pub fn shutdown(&self) -> Result<(), ApprovalError> {
        self.admission.approvals().flush()
    }

    // ==================== Invocation surface ====================

    /// Call a loaded tool.
    ///
    /// Names on `deny_list` are reported exactly like names that do not exist.
    pub async fn call(&self, name: &str, raw_arguments: &Value, deny_list: &[String]) -> ExecutionResult {
        if deny_list.iter().any(|denied| denied == name) {
            debug!(tool = %name, "Call refused by caller restriction set");
            return ExecutionResult::failure(FailureKind::UnknownTool);
        }

        let Some(entry) = self.admission.registry().get(name) else {
            debug!(tool = %name, "Call to unknown tool");
            return ExecutionResult::failure(FailureKind::UnknownTool);
        };

        let args = match self.filter.filter(&entry.descriptor, raw_arguments) {
            Ok(args) => args,
            Err(e) => {
                debug!(tool = %name, error = %e, "Arguments rejected");
                return ExecutionResult::input_rejected(e);
            }
        };

        self.executor.execute(&entry, &args).await
    }

    /// Run several calls concurrently; results come back in request order and
    /// each is independent of the others, including panics.
    pub async fn call_batch(
        self: &Arc<Self>,
        calls: Vec<ToolCallRequest>,
        deny_list: &[String],
    ) -> Vec<ExecutionResult> {
        let mut results: Vec<Option<ExecutionResult>> = vec![None; calls.len()];
        let mut set = JoinSet::new();

        for (index, request) in calls.into_iter().enumerate() {
            let gateway = Arc::clone(self);
            let deny_list = deny_list.to_vec();
            set.spawn(async move {
                let result = gateway
                    .call(&request.name, &request.arguments, &deny_list)
                    .await;
                (index, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!(error = %e, "Tool call task aborted"),
            }
        }

        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| {
                    warn!("Batch entry produced no result");
                    ExecutionResult::failure(FailureKind::ToolInternalError)
                })
            })
            .collect()
    }
}
