//! Logging configuration from TOML (`[logging]` section)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    /// Write admission decisions to `audit.jsonl` in the ledger directory
    pub audit: bool,
    /// Also write diagnostics to a daily-rolling file in this directory
    pub file_dir: Option<PathBuf>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            audit: true,
            file_dir: None,
        }
    }
}
