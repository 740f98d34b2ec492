//! Source directory port
//!
//! Read-only access to the directory of tool candidates, plus the event type
//! the watcher feeds to the admission consumer.

use std::io;
use toolgate_domain::SourceUnit;

/// A change notification from the watcher.
///
/// Events carry no content; the consumer always re-reads the unit, so
/// duplicated or reordered notifications converge on the file's latest state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Something happened to the unit with this key (created, modified, removed).
    Touched(String),
    /// The watcher lost track; reconcile the whole directory.
    Rescan,
}

pub trait SourceDirectoryPort: Send + Sync {
    /// Keys of every candidate unit currently present, sorted.
    fn list_keys(&self) -> io::Result<Vec<String>>;

    /// Read a unit's full content. `Ok(None)` when it no longer exists.
    fn read(&self, key: &str) -> io::Result<Option<SourceUnit>>;
}
