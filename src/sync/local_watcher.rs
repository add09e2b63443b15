use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Capacity of the watcher → coordinator channel. Events beyond this are
/// dropped with a warning; the next full scan picks the files up.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Created,
    Modified,
}

/// A change event from the local filesystem watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchKind,
}

/// Per-path event suppression: an event is discarded if a previously
/// accepted event for the same path is younger than the window. Editors
/// and downloaders fire bursts of create+modify for one file; only the
/// first should reach the uploader.
pub struct Debounce {
    window: Duration,
    last_event: HashMap<PathBuf, Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: HashMap::new(),
        }
    }

    /// True if the event should pass; records `now` as the last accepted
    /// event time for the path.
    pub fn accept(&mut self, path: &Path, now: Instant) -> bool {
        if let Some(prev) = self.last_event.get(path) {
            if now.duration_since(*prev) < self.window {
                return false;
            }
        }
        self.last_event.insert(path.to_path_buf(), now);
        true
    }
}

/// Map a raw notify event onto watch events. Only file create/modify
/// survive; directory events, removals and renames are dropped.
fn map_event(event: Event) -> Vec<WatchEvent> {
    let kind = match event.kind {
        EventKind::Create(CreateKind::Folder) => return Vec::new(),
        EventKind::Create(_) => WatchKind::Created,
        EventKind::Modify(ModifyKind::Name(_)) => return Vec::new(),
        EventKind::Modify(_) => WatchKind::Modified,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .filter(|path| !path.is_dir())
        .map(|path| WatchEvent { path, kind })
        .collect()
}

/// Handle that keeps the watcher alive. Drop to stop watching; in-flight
/// uploads are unaffected.
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
}

/// Start watching `root` recursively. Accepted events arrive on the
/// returned channel; duplicates within the debounce window are discarded
/// at the source.
pub fn start_watcher(
    root: &Path,
    debounce_window: Duration,
) -> Result<(mpsc::Receiver<WatchEvent>, WatcherHandle)> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let mut debounce = Debounce::new(debounce_window);

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                for watch_event in map_event(event) {
                    if !debounce.accept(&watch_event.path, Instant::now()) {
                        continue;
                    }
                    if tx.try_send(watch_event).is_err() {
                        tracing::warn!("watch event dropped — channel full or closed");
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "local watcher error"),
        }
    })
    .context("Failed to create file watcher")?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", root.display()))?;
    tracing::info!(root = %root.display(), "watching for new media");

    Ok((rx, WatcherHandle { _watcher: watcher }))
}
