//! Approval ledger configuration from TOML (`[ledger]` section)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory, next to the tools directory, that holds gateway state.
pub const STATE_DIR: &str = ".toolgate";

pub const LEDGER_FILE: &str = "approvals.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLedgerConfig {
    /// Ledger file. Defaults to `.toolgate/approvals.json` beside the tools directory.
    pub path: Option<PathBuf>,
}

impl FileLedgerConfig {
    pub fn resolve(&self, tools_dir: &Path) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        let base = match tools_dir.parent() {
            Some(parent) => parent,
            None => tools_dir,
        };
        base.join(STATE_DIR).join(LEDGER_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sits_beside_tools_dir() {
        let config = FileLedgerConfig::default();
        assert_eq!(
            config.resolve(Path::new("/srv/agent/tools")),
            PathBuf::from("/srv/agent/.toolgate/approvals.json")
        );
        assert_eq!(
            config.resolve(Path::new("tools")),
            PathBuf::from(".toolgate/approvals.json")
        );
    }

    #[test]
    fn test_explicit_path_wins() {
        let config = FileLedgerConfig {
            path: Some(PathBuf::from("/var/lib/toolgate/ledger.json")),
        };
        assert_eq!(
            config.resolve(Path::new("tools")),
            PathBuf::from("/var/lib/toolgate/ledger.json")
        );
    }
}
