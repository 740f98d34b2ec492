//! Composition root: wires the adapters in this crate into a [`ToolGateway`].

use crate::approval::JsonApprovalStore;
use crate::config::FileConfig;
use crate::logging::JsonlAuditLog;
use crate::scanner::LuaRiskScanner;
use crate::scripting::LuaToolLoader;
use crate::source::{DirectoryWatcher, LocalSourceDirectory, WatchError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use toolgate_application::{
    AdmissionAuditLog, AdmissionController, ApprovalStorePort, ExecutionWrapper, NoAuditLog,
    ToolGateway,
};
use toolgate_domain::ApprovalError;
use tracing::{info, warn};

/// Capacity of the watcher → event loop channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to build risk scanner: {0}")]
    Scanner(#[from] regex::Error),
    #[error("failed to create tools directory {path}: {source}")]
    ToolsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Scanner configured from `[tools]`.
pub fn build_scanner(config: &FileConfig) -> Result<LuaRiskScanner, BootstrapError> {
    Ok(LuaRiskScanner::new()?
        .with_max_source_bytes(config.tools.max_source_bytes.max(1))
        .with_max_parse_depth(config.tools.max_parse_depth.max(1)))
}

/// The gateway plus the concrete ledger behind it.
pub struct GatewayServices {
    pub gateway: Arc<ToolGateway>,
    pub ledger: Arc<JsonApprovalStore>,
}

/// Build a gateway over the configured tools directory and ledger.
///
/// Nothing is admitted yet; call [`ToolGateway::reconcile`] or [`serve`].
pub fn build(config: &FileConfig) -> Result<GatewayServices, BootstrapError> {
    let scanner = Arc::new(build_scanner(config)?);
    let ledger = Arc::new(JsonApprovalStore::open(config.ledger_path()));
    let source = Arc::new(LocalSourceDirectory::new(&config.tools.dir));

    let audit: Arc<dyn AdmissionAuditLog> = match config.logging.audit {
        true => match JsonlAuditLog::new(config.audit_path()) {
            Some(log) => Arc::new(log),
            None => Arc::new(NoAuditLog),
        },
        false => Arc::new(NoAuditLog),
    };

    let admission = AdmissionController::new(
        scanner,
        Arc::clone(&ledger) as Arc<dyn ApprovalStorePort>,
        Arc::new(LuaToolLoader::new()),
        source,
        audit,
    );
    let executor = ExecutionWrapper::new(config.execution.to_execution_params());
    Ok(GatewayServices {
        gateway: Arc::new(ToolGateway::new(admission, executor)),
        ledger,
    })
}

/// Shorthand for [`build`] when the ledger handle is not needed.
pub fn build_gateway(config: &FileConfig) -> Result<Arc<ToolGateway>, BootstrapError> {
    Ok(build(config)?.gateway)
}

/// A running watcher and event loop. Call [`ServeHandle::stop`] to shut down.
pub struct ServeHandle {
    watcher: DirectoryWatcher,
    shutdown: CancellationToken,
    event_loop: JoinHandle<()>,
    ledger_sync: JoinHandle<()>,
    gateway: Arc<ToolGateway>,
}

impl ServeHandle {
    pub fn gateway(&self) -> &Arc<ToolGateway> {
        &self.gateway
    }

    /// Stop watching, drain the event loop and flush the ledger.
    pub async fn stop(self) -> Result<(), ApprovalError> {
        self.shutdown.cancel();
        drop(self.watcher);
        if let Err(e) = self.event_loop.await {
            warn!(error = %e, "Event loop ended abnormally");
        }
        if let Err(e) = self.ledger_sync.await {
            warn!(error = %e, "Ledger sync ended abnormally");
        }
        self.gateway.shutdown()
    }
}

/// Start watching the tools directory, reconcile it, then apply changes as
/// they arrive.
///
/// The watcher starts before the boot reconcile so no change falls between
/// the two. Approvals that other processes (`toolgate approve`) write to the
/// ledger are picked up every watcher poll interval.
pub async fn serve(
    services: GatewayServices,
    config: &FileConfig,
) -> Result<ServeHandle, BootstrapError> {
    let GatewayServices { gateway, ledger } = services;
    let dir = &config.tools.dir;
    std::fs::create_dir_all(dir).map_err(|source| BootstrapError::ToolsDir {
        path: dir.clone(),
        source,
    })?;

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let watcher = DirectoryWatcher::start(
        dir,
        config.watcher.mode,
        config.watcher.poll_interval(),
        tx,
    )?;

    gateway.reconcile().await;

    let shutdown = CancellationToken::new();
    let event_loop = tokio::spawn(Arc::clone(&gateway).run_event_loop(rx, shutdown.clone()));
    let ledger_sync = tokio::spawn(sync_ledger(
        Arc::clone(&gateway),
        ledger,
        config.watcher.poll_interval(),
        shutdown.clone(),
    ));
    info!(dir = %dir.display(), "Serving tools");

    Ok(ServeHandle {
        watcher,
        shutdown,
        event_loop,
        ledger_sync,
        gateway,
    })
}

/// Admit pending tools whose digest another process approved.
async fn sync_ledger(
    gateway: Arc<ToolGateway>,
    ledger: Arc<JsonApprovalStore>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if ledger.reload() == 0 {
                    continue;
                }
                for pending in gateway.list_pending() {
                    let Some(record) = ledger.lookup(&pending.digest) else {
                        continue;
                    };
                    match gateway.approve(&pending.digest.to_hex(), &record.decided_by).await {
                        Ok(()) => info!(
                            tool = %pending.name,
                            digest = %pending.digest.short(),
                            decided_by = %record.decided_by,
                            "Applied approval from ledger"
                        ),
                        Err(e) => warn!(tool = %pending.name, error = %e, "Could not apply ledger approval"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::WatchMode;
    use serde_json::json;
    use std::path::Path;
    use toolgate_application::AdmissionOutcome;
    use toolgate_domain::{AdmissionState, FailureKind, RiskFlag};

    const GREET: &str = r#"
local function run(args)
  return "hello " .. args.who
end

return {
  name = "greet",
  description = "Greets someone",
  parameters = {
    { name = "who", type = "string", required = true },
    { name = "tone", type = "string", enum = { "warm", "formal" } },
  },
  run = run,
}
"#;

    const EVAL: &str = r#"
return {
  name = "calc",
  description = "Evaluates an expression",
  parameters = { { name = "expr", type = "string", required = true } },
  run = function(args)
    local chunk = load("return " .. args.expr)
    return chunk()
  end,
}
"#;

    const SLOW: &str = r#"
return {
  name = "slow",
  description = "Never finishes",
  run = function() while true do end end,
}
"#;

    const ALIASED: &str = r#"
local o = os
return {
  name = "shell",
  description = "Runs a command",
  parameters = { { name = "cmd", type = "string", required = true } },
  run = function(args) return o.execute(args.cmd) end,
}
"#;

    struct Fixture {
        _root: tempfile::TempDir,
        config: FileConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            let mut config = FileConfig::default();
            config.tools.dir = root.path().join("tools");
            config.execution.retry.max_attempts = 1;
            config.watcher.mode = WatchMode::Poll;
            config.watcher.poll_interval_ms = 50;
            std::fs::create_dir_all(&config.tools.dir).unwrap();
            Self {
                _root: root,
                config,
            }
        }

        fn tools_dir(&self) -> &Path {
            &self.config.tools.dir
        }

        fn write(&self, name: &str, source: &str) {
            std::fs::write(self.tools_dir().join(format!("{}.lua", name)), source).unwrap();
        }

        fn remove(&self, name: &str) {
            std::fs::remove_file(self.tools_dir().join(format!("{}.lua", name))).unwrap();
        }

        fn gateway(&self) -> Arc<ToolGateway> {
            build_gateway(&self.config).unwrap()
        }

        fn services(&self) -> GatewayServices {
            build(&self.config).unwrap()
        }
    }

    #[tokio::test]
    async fn test_clean_tool_is_auto_approved_and_callable() {
        let fx = Fixture::new();
        fx.write("greet", GREET);
        let gateway = fx.gateway();

        gateway.reconcile().await;
        let names: Vec<_> = gateway.list_tools().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["greet"]);

        let result = gateway.call("greet", &json!({ "who": "ada" }), &[]).await;
        assert_eq!(result.output(), Some("hello ada"));

        let ledger = std::fs::read_to_string(fx.config.ledger_path()).unwrap();
        assert!(ledger.contains("\"automatic\""));
    }

    #[tokio::test]
    async fn test_flagged_tool_waits_for_approval() {
        let fx = Fixture::new();
        fx.write("calc", EVAL);
        let gateway = fx.gateway();

        gateway.reconcile().await;
        assert!(gateway.list_tools().is_empty());
        let pending = gateway.list_pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].verdict.has(RiskFlag::DynamicEval));

        let before = gateway.call("calc", &json!({ "expr": "1 + 2" }), &[]).await;
        assert_eq!(before.failure_kind(), Some(FailureKind::UnknownTool));

        gateway
            .approve(&pending[0].digest.to_hex(), "alice")
            .await
            .unwrap();
        let after = gateway.call("calc", &json!({ "expr": "1 + 2" }), &[]).await;
        assert_eq!(after.output(), Some("3"));
    }

    #[tokio::test]
    async fn test_approval_survives_restart() {
        let fx = Fixture::new();
        fx.write("calc", EVAL);

        let first = fx.gateway();
        first.reconcile().await;
        let digest = first.list_pending()[0].digest.to_hex();
        first.approve(&digest, "alice").await.unwrap();
        first.shutdown().unwrap();
        drop(first);

        let second = fx.gateway();
        second.reconcile().await;
        assert!(second.list_pending().is_empty());
        assert_eq!(second.list_tools().len(), 1);
    }

    #[tokio::test]
    async fn test_aliased_process_spawn_is_flagged() {
        let fx = Fixture::new();
        fx.write("shell", ALIASED);
        let gateway = fx.gateway();

        gateway.reconcile().await;
        let pending = gateway.list_pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].verdict.has(RiskFlag::ProcessSpawn));
        assert!(gateway.list_tools().is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_argument_is_rejected() {
        let fx = Fixture::new();
        fx.write("greet", GREET);
        let gateway = fx.gateway();
        gateway.reconcile().await;

        let missing = gateway.call("greet", &json!({}), &[]).await;
        assert_eq!(missing.failure_kind(), Some(FailureKind::InputRejected));

        let bad_enum = gateway
            .call("greet", &json!({ "who": "ada", "tone": "rude" }), &[])
            .await;
        assert_eq!(bad_enum.failure_kind(), Some(FailureKind::InputRejected));
    }

    #[tokio::test]
    async fn test_timeout_does_not_affect_a_concurrent_call() {
        let mut fx = Fixture::new();
        fx.config.execution.timeout_secs = 1;
        fx.write("slow", SLOW);
        fx.write("greet", GREET);
        let gateway = fx.gateway();
        gateway.reconcile().await;
        let approval = gateway.list_pending();
        assert!(approval.is_empty(), "{:?}", approval);

        let results = gateway
            .call_batch(
                vec![
                    toolgate_application::ToolCallRequest::new("slow", json!({})),
                    toolgate_application::ToolCallRequest::new("greet", json!({ "who": "bo" })),
                ],
                &[],
            )
            .await;
        assert_eq!(results[0].failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(results[1].output(), Some("hello bo"));
    }

    #[tokio::test]
    async fn test_single_byte_change_needs_readmission() {
        let fx = Fixture::new();
        fx.write("calc", EVAL);
        let gateway = fx.gateway();
        gateway.reconcile().await;
        let digest = gateway.list_pending()[0].digest.to_hex();
        gateway.approve(&digest, "alice").await.unwrap();
        assert_eq!(gateway.admission().state_of("calc"), AdmissionState::Loaded);

        fx.write("calc", &EVAL.replacen("Evaluates", "evaluates", 1));
        let outcome = gateway.admission().refresh("calc").await;
        assert!(matches!(outcome, AdmissionOutcome::Pending { .. }));
        assert!(gateway.list_tools().is_empty());
        assert_ne!(gateway.list_pending()[0].digest.to_hex(), digest);
    }

    #[tokio::test]
    async fn test_removed_tool_becomes_unknown() {
        let fx = Fixture::new();
        fx.write("greet", GREET);
        let gateway = fx.gateway();
        gateway.reconcile().await;

        fx.remove("greet");
        gateway.reconcile().await;
        let result = gateway.call("greet", &json!({ "who": "ada" }), &[]).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::UnknownTool));
        assert_eq!(gateway.admission().state_of("greet"), AdmissionState::Absent);
    }

    #[tokio::test]
    async fn test_name_mismatch_is_never_loaded() {
        let fx = Fixture::new();
        fx.write("hello", GREET);
        let gateway = fx.gateway();
        gateway.reconcile().await;

        assert!(gateway.list_tools().is_empty());
        let pending = gateway.list_pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].verdict.has(RiskFlag::Malformed));
    }

    #[tokio::test]
    async fn test_audit_log_records_decisions() {
        let fx = Fixture::new();
        fx.write("greet", GREET);
        fx.write("calc", EVAL);
        let gateway = fx.gateway();
        gateway.reconcile().await;
        drop(gateway);

        let audit = std::fs::read_to_string(fx.config.audit_path()).unwrap();
        let records: Vec<serde_json::Value> = audit
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let kinds_for = |tool: &str| -> Vec<String> {
            records
                .iter()
                .filter(|r| r["tool"] == tool)
                .map(|r| r["type"].as_str().unwrap().to_string())
                .collect()
        };
        assert_eq!(kinds_for("greet"), vec!["auto_approved", "loaded"]);
        assert_eq!(kinds_for("calc"), vec!["pending"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serve_picks_up_new_tools() {
        let fx = Fixture::new();
        let handle = serve(fx.services(), &fx.config).await.unwrap();
        assert!(handle.gateway().list_tools().is_empty());

        fx.write("greet", GREET);
        let loaded = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if !handle.gateway().list_tools().is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await;
        assert!(loaded.is_ok(), "watcher never admitted the new tool");

        handle.stop().await.unwrap();
    }

    async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serve_applies_approvals_from_another_process() {
        let fx = Fixture::new();
        fx.write("calc", EVAL);
        let handle = serve(fx.services(), &fx.config).await.unwrap();
        let pending = handle.gateway().list_pending();
        assert_eq!(pending.len(), 1);

        // What `toolgate approve` does: its own gateway over the same ledger.
        let operator = fx.gateway();
        operator.reconcile().await;
        operator
            .approve(&pending[0].digest.to_hex(), "alice")
            .await
            .unwrap();

        let gateway = Arc::clone(handle.gateway());
        assert!(
            wait_until(|| !gateway.list_tools().is_empty()).await,
            "approval written by another process was never applied"
        );
        handle.stop().await.unwrap();
    }
}
