//! Application layer for toolgate
//!
//! This crate contains use cases, port definitions, and application configuration.
//! It depends only on the domain layer.
//!
//! ```text
//! watcher ──SourceEvent──▶ ToolGateway::run_event_loop
//!                               │
//!                               ▼
//!                      AdmissionController ──▶ RiskScannerPort
//!                               │          ──▶ ApprovalStorePort
//!                               │          ──▶ ToolLoaderPort ──▶ Arc<dyn Callable>
//!                               ▼
//!                          ToolRegistry ◀── ToolGateway::call ──▶ ExecutionWrapper
//! ```

pub mod config;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use config::{ExecutionParams, MIN_TOOL_TIMEOUT, RetryPolicy};
pub use ports::{
    approval_store::{ApprovalStorePort, InMemoryApprovalStore},
    audit_log::{AdmissionAuditLog, AdmissionEvent, NoAuditLog},
    callable::{Callable, InvocationError},
    risk_scanner::{RiskScannerPort, ScanReport},
    source_directory::{SourceDirectoryPort, SourceEvent},
    tool_loader::{LoadError, ToolLoaderPort},
};
pub use use_cases::admission::{AdmissionController, AdmissionOutcome};
pub use use_cases::execution::ExecutionWrapper;
pub use use_cases::gateway::{ToolCallRequest, ToolGateway};
pub use use_cases::registry::{RegistryEntry, RegistryStats, ToolRegistry};
