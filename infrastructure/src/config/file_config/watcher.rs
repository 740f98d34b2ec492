//! Watcher configuration from TOML (`[watcher]` section)

use crate::source::WatchMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileWatcherConfig {
    /// `native` or `poll`
    pub mode: WatchMode,
    /// Only used in `poll` mode
    pub poll_interval_ms: u64,
}

impl Default for FileWatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Native,
            poll_interval_ms: 2000,
        }
    }
}

impl FileWatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}
