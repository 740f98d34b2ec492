//! Admission audit trail as a JSONL file.
//!
//! One line per [`AdmissionEvent`]: the event's own fields, its `type` tag,
//! and a millisecond `timestamp`. The file is opened for append so the trail
//! spans restarts, and each line is flushed before `record` returns.

use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use toolgate_application::{AdmissionAuditLog, AdmissionEvent};
use tracing::warn;

/// One line of the trail.
#[derive(Serialize)]
struct AuditLine<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a AdmissionEvent,
}

impl<'a> AuditLine<'a> {
    fn now(event: &'a AdmissionEvent) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
        }
    }
}

/// Appends admission events to a JSONL file.
pub struct JsonlAuditLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
    /// Set after the first failed write so a full disk warns once, not per event.
    degraded: AtomicBool,
}

impl JsonlAuditLog {
    /// Open (or create) the trail, creating parent directories.
    ///
    /// Returns `None` when the file cannot be opened; the gateway then runs
    /// without an audit trail.
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        match open_append(path) {
            Ok(file) => Some(Self {
                writer: Mutex::new(BufWriter::new(file)),
                path: path.to_path_buf(),
                degraded: AtomicBool::new(false),
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not open audit log");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &AdmissionEvent) -> io::Result<()> {
        let line = serde_json::to_string(&AuditLine::now(event))?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)?;
        writer.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

impl AdmissionAuditLog for JsonlAuditLog {
    fn record(&self, event: AdmissionEvent) {
        if let Err(e) = self.append(&event) {
            if !self.degraded.swap(true, Ordering::Relaxed) {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    event = event.kind(),
                    tool = %event.tool(),
                    "Audit log write failed; further failures are silent"
                );
            }
        }
    }
}

impl Drop for JsonlAuditLog {
    fn drop(&mut self) {
        let writer = self.writer.get_mut().unwrap_or_else(PoisonError::into_inner);
        let _ = writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolgate_domain::{
        ApprovalKind, ApprovalRecord, ContentDigest, Finding, PassKind, RiskFlag, RiskVerdict,
    };

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_admission_events_become_tagged_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".toolgate").join("audit.jsonl");
        let log = JsonlAuditLog::new(&path).unwrap();

        let digest = ContentDigest::of(b"load('x')");
        let verdict = RiskVerdict::from_findings([Finding::new(
            RiskFlag::DynamicEval,
            PassKind::Structural,
            "load",
        )
        .at_line(3)]);
        log.record(AdmissionEvent::pending("fetch", digest, &verdict));
        log.record(AdmissionEvent::approved(
            "fetch",
            &ApprovalRecord::manual(digest, "alice"),
            &verdict,
        ));
        log.record(AdmissionEvent::loaded("fetch", digest, ApprovalKind::Manual));
        drop(log);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l["timestamp"].is_string()));
        assert!(lines.iter().all(|l| l["tool"] == "fetch"));
        assert!(lines.iter().all(|l| l["digest"] == digest.to_hex()));

        assert_eq!(lines[0]["type"], "pending");
        assert_eq!(lines[0]["findings"][0]["line"], 3);
        assert_eq!(lines[1]["type"], "approved");
        assert_eq!(lines[1]["decided_by"], "alice");
        assert_eq!(lines[2]["type"], "loaded");
        assert_eq!(lines[2]["approval"], "manual");
    }

    #[test]
    fn test_removal_has_no_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = JsonlAuditLog::new(&path).unwrap();

        log.record(AdmissionEvent::removed("gone"));
        drop(log);

        let lines = read_lines(&path);
        assert_eq!(lines[0]["type"], "removed");
        assert_eq!(lines[0]["tool"], "gone");
        assert!(lines[0].get("digest").is_none());
    }

    #[test]
    fn test_trail_spans_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let first = JsonlAuditLog::new(&path).unwrap();
        first.record(AdmissionEvent::auto_approved("a", ContentDigest::of(b"a")));
        drop(first);
        let second = JsonlAuditLog::new(&path).unwrap();
        second.record(AdmissionEvent::load_failed("b", ContentDigest::of(b"b"), "syntax error"));
        drop(second);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["decided_by"], "auto");
        assert_eq!(lines[1]["type"], "load_failed");
        assert_eq!(lines[1]["reason"], "syntax error");
    }

    #[test]
    fn test_unopenable_path_disables_the_trail() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        assert!(JsonlAuditLog::new(blocker.join("audit.jsonl")).is_none());
    }
}
