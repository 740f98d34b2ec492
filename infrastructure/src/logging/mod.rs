//! Logging infrastructure — structured admission audit trail.
//!
//! Provides [`JsonlAuditLog`], a JSONL file writer that implements
//! the [`AdmissionAuditLog`](toolgate_application::AdmissionAuditLog) port.

mod jsonl_audit;

pub use jsonl_audit::JsonlAuditLog;
