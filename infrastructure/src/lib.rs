//! Infrastructure layer for toolgate
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer: the Lua risk scanner and runtime, the JSON
//! approval ledger, the tools directory and its watcher, the JSONL audit
//! log, and configuration file loading.

pub mod approval;
pub mod bootstrap;
pub mod config;
pub mod logging;
pub mod scanner;
pub mod scripting;
pub mod source;

// Re-export commonly used types
pub use approval::JsonApprovalStore;
pub use bootstrap::{
    BootstrapError, GatewayServices, ServeHandle, build, build_gateway, build_scanner, serve,
};
pub use config::{ConfigLoader, ConfigValidationError, FileConfig};
pub use logging::JsonlAuditLog;
pub use scanner::{DescriptorError, LuaRiskScanner, ScanPass};
pub use scripting::LuaToolLoader;
pub use source::{DirectoryWatcher, LocalSourceDirectory, WatchError, WatchMode};
