//! Port definitions (interfaces for external adapters)
//!
//! Ports define the contracts that infrastructure adapters must implement.

pub mod approval_store;
pub mod audit_log;
pub mod callable;
pub mod risk_scanner;
pub mod source_directory;
pub mod tool_loader;
