//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! Every section is `#[serde(default)]`, so a partial file is always valid.

mod execution;
mod ledger;
mod logging;
mod tools;
mod watcher;

pub use execution::{FileExecutionConfig, FileRetryConfig};
pub use ledger::{FileLedgerConfig, LEDGER_FILE, STATE_DIR};
pub use logging::FileLoggingConfig;
pub use tools::FileToolsConfig;
pub use watcher::FileWatcherConfig;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration validation errors
///
/// None of these stop the gateway: out-of-range values are clamped when the
/// configuration is converted. They exist so the operator learns about it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigValidationError {
    #[error("execution.timeout_secs is 0, using 1 second")]
    ZeroTimeout,

    #[error("execution.retry.max_attempts is 0, using 1")]
    ZeroAttempts,

    #[error("execution.retry.multiplier {0} is below 1.0, using 1.0")]
    ShrinkingBackoff(f64),

    #[error("execution.retry.max_delay_ms is below base_delay_ms")]
    InvertedDelays,

    #[error("{0} must be greater than 0")]
    ZeroLimit(&'static str),

    #[error("tools.dir is empty")]
    EmptyToolsDir,
}

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Tools directory and scan limits
    pub tools: FileToolsConfig,
    /// Approval ledger location
    pub ledger: FileLedgerConfig,
    /// Timeout, retry and output limits
    pub execution: FileExecutionConfig,
    /// Directory watcher
    pub watcher: FileWatcherConfig,
    /// Audit log and diagnostic log file
    pub logging: FileLoggingConfig,
}

impl FileConfig {
    /// Validate the entire configuration, returning all detected issues.
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut issues = Vec::new();

        if self.tools.dir.as_os_str().is_empty() {
            issues.push(ConfigValidationError::EmptyToolsDir);
        }
        if self.tools.max_source_bytes == 0 {
            issues.push(ConfigValidationError::ZeroLimit("tools.max_source_bytes"));
        }
        if self.tools.max_parse_depth == 0 {
            issues.push(ConfigValidationError::ZeroLimit("tools.max_parse_depth"));
        }

        let execution = &self.execution;
        if execution.timeout_secs == 0 {
            issues.push(ConfigValidationError::ZeroTimeout);
        }
        if execution.max_output_bytes == 0 {
            issues.push(ConfigValidationError::ZeroLimit("execution.max_output_bytes"));
        }
        if execution.retry.max_attempts == 0 {
            issues.push(ConfigValidationError::ZeroAttempts);
        }
        if execution.retry.multiplier < 1.0 {
            issues.push(ConfigValidationError::ShrinkingBackoff(
                execution.retry.multiplier,
            ));
        }
        if execution.retry.max_delay_ms < execution.retry.base_delay_ms {
            issues.push(ConfigValidationError::InvertedDelays);
        }

        if self.watcher.poll_interval_ms == 0 {
            issues.push(ConfigValidationError::ZeroLimit("watcher.poll_interval_ms"));
        }

        issues
    }

    /// Resolved ledger file path.
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger.resolve(&self.tools.dir)
    }

    /// Resolved audit log path: `audit.jsonl` next to the ledger.
    pub fn audit_path(&self) -> PathBuf {
        self.ledger_path().with_file_name("audit.jsonl")
    }
}
