//! Tools directory configuration from TOML (`[tools]` section)

use crate::scanner::{DEFAULT_MAX_PARSE_DEPTH, DEFAULT_MAX_SOURCE_BYTES};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw tools configuration from TOML
///
/// # Example
///
/// ```toml
/// [tools]
/// dir = "./tools"
/// max_source_bytes = 262144
/// max_parse_depth = 200
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileToolsConfig {
    /// Directory holding `<name>.lua` tool units
    pub dir: PathBuf,
    /// Units larger than this are not parsed
    pub max_source_bytes: usize,
    /// Syntactic nesting limit for the structural scan
    pub max_parse_depth: usize,
}

impl Default for FileToolsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tools"),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            max_parse_depth: DEFAULT_MAX_PARSE_DEPTH,
        }
    }
}
