//! In-memory port fakes shared by the use case tests.
//!
//! The fake scanner flags `EVAL` as dynamic-eval. Loaded fakes echo their
//! source, or react to markers in it: `SLOW` hangs until cancelled, `GATED`
//! waits for the loader's gate to open, `BUSY` reports back-pressure,
//! `FAILS_TO_LOAD` refuses to load, and `REQUIRES_TEXT` makes the `text`
//! parameter required.

use crate::ports::audit_log::{AdmissionAuditLog, AdmissionEvent};
use crate::ports::callable::{Callable, InvocationError};
use crate::ports::risk_scanner::{RiskScannerPort, ScanReport};
use crate::ports::source_directory::SourceDirectoryPort;
use crate::ports::tool_loader::{LoadError, ToolLoaderPort};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use toolgate_domain::{
    CapabilityDescriptor, Finding, ParamSpec, ParamType, PassKind, RiskFlag, RiskVerdict,
    SourceUnit, TypedArguments,
};

pub(crate) struct FakeScanner;

impl RiskScannerPort for FakeScanner {
    fn inspect(&self, source: &[u8], unit_key: Option<&str>) -> ScanReport {
        let text = String::from_utf8_lossy(source);
        let verdict = if text.contains("EVAL") {
            RiskVerdict::from_findings([Finding::new(
                RiskFlag::DynamicEval,
                PassKind::Lexical,
                "EVAL",
            )])
        } else {
            RiskVerdict::clean()
        };
        let mut text_param = ParamSpec::new("text", ParamType::String);
        if text.contains("REQUIRES_TEXT") {
            text_param = text_param.required();
        }
        let descriptor = CapabilityDescriptor::new(unit_key.unwrap_or("fake"), "fake tool")
            .with_parameter(text_param);
        ScanReport {
            verdict,
            descriptor: Some(descriptor),
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeLoader {
    pub calls: Arc<AtomicU32>,
    pub gate: Arc<Notify>,
}

impl ToolLoaderPort for FakeLoader {
    fn load(
        &self,
        unit: &SourceUnit,
        _descriptor: &CapabilityDescriptor,
    ) -> Result<Arc<dyn Callable>, LoadError> {
        let body = String::from_utf8_lossy(unit.content()).into_owned();
        if body.contains("FAILS_TO_LOAD") {
            return Err(LoadError::Compile("fake compile error".into()));
        }
        Ok(Arc::new(FakeCallable {
            body,
            calls: Arc::clone(&self.calls),
            gate: Arc::clone(&self.gate),
        }))
    }
}

struct FakeCallable {
    body: String,
    calls: Arc<AtomicU32>,
    gate: Arc<Notify>,
}

#[async_trait]
impl Callable for FakeCallable {
    async fn invoke(
        &self,
        args: &TypedArguments,
        cancel: CancellationToken,
    ) -> Result<String, InvocationError> {
        let gated = self.gate.notified();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.body.contains("GATED") {
            gated.await;
        }
        if self.body.contains("SLOW") {
            cancel.cancelled().await;
            return Err(InvocationError::Cancelled);
        }
        if self.body.contains("BUSY") {
            return Err(InvocationError::Transient("busy".into()));
        }
        Ok(match args.get("text").and_then(|v| v.as_str()) {
            Some(text) => text.to_string(),
            None => self.body.clone(),
        })
    }
}

#[derive(Default)]
pub(crate) struct MemorySource {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, body: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(key.to_string(), body.as_bytes().to_vec());
    }

    pub fn remove(&self, key: &str) {
        self.files.lock().unwrap().remove(key);
    }
}

impl SourceDirectoryPort for MemorySource {
    fn list_keys(&self) -> io::Result<Vec<String>> {
        Ok(self.files.lock().unwrap().keys().cloned().collect())
    }

    fn read(&self, key: &str) -> io::Result<Option<SourceUnit>> {
        Ok(self.files.lock().unwrap().get(key).map(|body| {
            SourceUnit::new(key, PathBuf::from(format!("{}.lua", key)), body.clone())
        }))
    }
}

/// Keeps every audit event in order.
#[derive(Default)]
pub(crate) struct RecordingAudit {
    events: Mutex<Vec<AdmissionEvent>>,
}

impl RecordingAudit {
    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(AdmissionEvent::kind).collect()
    }
}

impl AdmissionAuditLog for RecordingAudit {
    fn record(&self, event: AdmissionEvent) {
        self.events.lock().unwrap().push(event);
    }
}
