//! Tools directory watcher.
//!
//! The notify callback runs on notify's own thread and only translates raw
//! events into [`SourceEvent`]s; all admission work happens on the consumer
//! side of the channel.

use super::local_dir::unit_key;
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use toolgate_application::SourceEvent;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Platform notification API (inotify, FSEvents, ...).
    #[default]
    Native,
    /// Periodic directory scan. Works on network and container mounts.
    Poll,
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to create watcher: {0}")]
    Create(#[source] notify::Error),
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Keeps the underlying watcher alive; dropping it stops event delivery.
pub struct DirectoryWatcher {
    _watcher: Box<dyn Watcher + Send>,
    dir: PathBuf,
}

impl DirectoryWatcher {
    /// Watch `dir` (non-recursively) and forward events into `events`.
    pub fn start(
        dir: &Path,
        mode: WatchMode,
        poll_interval: Duration,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<Self, WatchError> {
        let handler = move |result: notify::Result<Event>| {
            for event in translate(result) {
                if events.blocking_send(event).is_err() {
                    debug!("Source event receiver closed, dropping event");
                    return;
                }
            }
        };

        let mut watcher: Box<dyn Watcher + Send> = match mode {
            WatchMode::Native => {
                Box::new(RecommendedWatcher::new(handler, notify::Config::default()).map_err(WatchError::Create)?)
            }
            WatchMode::Poll => Box::new(
                PollWatcher::new(
                    handler,
                    notify::Config::default().with_poll_interval(poll_interval),
                )
                .map_err(WatchError::Create)?,
            ),
        };

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Watch {
                path: dir.to_path_buf(),
                source,
            })?;

        debug!(dir = %dir.display(), ?mode, "Watching tools directory");
        Ok(Self {
            _watcher: watcher,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn translate(result: notify::Result<Event>) -> Vec<SourceEvent> {
    let event = match result {
        Ok(event) => event,
        Err(e) => {
            warn!("Watcher error, scheduling a full rescan: {}", e);
            return vec![SourceEvent::Rescan];
        }
    };

    if matches!(event.kind, EventKind::Access(_)) {
        return Vec::new();
    }
    if event.need_rescan() {
        return vec![SourceEvent::Rescan];
    }

    let keys: BTreeSet<String> = event.paths.iter().filter_map(|p| unit_key(p)).collect();
    keys.into_iter().map(SourceEvent::Touched).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, Flag, ModifyKind, RemoveKind};

    #[test]
    fn test_translate_touched_units() {
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/tools/greet.lua"))
            .add_path(PathBuf::from("/tools/greet.lua"))
            .add_path(PathBuf::from("/tools/notes.txt"));
        assert_eq!(
            translate(Ok(event)),
            vec![SourceEvent::Touched("greet".into())]
        );
    }

    #[test]
    fn test_translate_rename_touches_both_sides() {
        let event = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/tools/old.lua"))
            .add_path(PathBuf::from("/tools/new.lua"));
        assert_eq!(
            translate(Ok(event)),
            vec![
                SourceEvent::Touched("new".into()),
                SourceEvent::Touched("old".into())
            ]
        );
    }

    #[test]
    fn test_translate_ignores_access() {
        let event = Event::new(EventKind::Access(AccessKind::Any))
            .add_path(PathBuf::from("/tools/greet.lua"));
        assert!(translate(Ok(event)).is_empty());
    }

    #[test]
    fn test_translate_rescan_flag_and_errors() {
        let event = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert_eq!(translate(Ok(event)), vec![SourceEvent::Rescan]);
        assert_eq!(
            translate(Err(notify::Error::generic("overflow"))),
            vec![SourceEvent::Rescan]
        );
    }

    #[test]
    fn test_translate_ignores_dotfiles() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tools/.greet.lua.swp"))
            .add_path(PathBuf::from("/tools/.greet.lua"));
        assert!(translate(Ok(event)).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_poll_watcher_reports_new_unit() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let _watcher =
            DirectoryWatcher::start(dir.path(), WatchMode::Poll, Duration::from_millis(50), tx)
                .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        std::fs::write(dir.path().join("greet.lua"), "return {}").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(SourceEvent::Touched(key)) => return key,
                    Some(SourceEvent::Rescan) => continue,
                    None => panic!("watcher channel closed"),
                }
            }
        })
        .await
        .expect("no event from poll watcher");
        assert_eq!(event, "greet");
    }

    #[test]
    fn test_watching_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(1);
        let result = DirectoryWatcher::start(
            &dir.path().join("absent"),
            WatchMode::Native,
            Duration::from_secs(1),
            tx,
        );
        assert!(matches!(result, Err(WatchError::Watch { .. })));
    }
}
