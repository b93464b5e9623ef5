//! File watcher with debouncing for the edited note file.
//!
//! Watches the file's parent directory so editors that save by renaming a
//! temporary file over the original are still seen.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Quiet period before a burst of filesystem events is reported.
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created or modified
    Modified,
    /// File was deleted
    Deleted,
}

pub struct FileWatcher {
    path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEventKind>,
}

/// Last seen mtime, to filter spurious events (Docker volume bug workaround)
type MtimeCache = Arc<Mutex<Option<SystemTime>>>;

impl FileWatcher {
    pub fn new(path: &Path) -> Result<Self> {
        // Canonicalize so event paths (which are resolved) compare equal
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow::anyhow!("{:?} has no parent directory", path))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watched = path.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(None));

        let mut debouncer = new_debouncer(
            WATCH_DEBOUNCE,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    if !events.iter().any(|event| event.path == watched) {
                        return;
                    }
                    if let Some(kind) = Self::classify(&watched, &mtime_cache) {
                        let _ = event_tx.send(kind);
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer.watcher().watch(&dir, RecursiveMode::NonRecursive)?;
        debug!("Watching {:?}", path);

        Ok(Self {
            path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Decide what happened to the file, or None for a spurious event.
    fn classify(path: &Path, mtime_cache: &MtimeCache) -> Option<FileEventKind> {
        let mut last_mtime = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());

        let Ok(metadata) = std::fs::metadata(path) else {
            *last_mtime = None;
            return Some(FileEventKind::Deleted);
        };

        if let Ok(mtime) = metadata.modified() {
            if *last_mtime == Some(mtime) {
                return None;
            }
            *last_mtime = Some(mtime);
        }
        Some(FileEventKind::Modified)
    }

    /// Wait for the next change to the file.
    pub async fn recv(&mut self) -> Option<FileEventKind> {
        self.event_rx.recv().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
