//! Tools directory access and change notification.

mod local_dir;
mod watcher;

pub use local_dir::{LocalSourceDirectory, TOOL_EXTENSION, unit_key};
pub use watcher::{DirectoryWatcher, WatchError, WatchMode};
