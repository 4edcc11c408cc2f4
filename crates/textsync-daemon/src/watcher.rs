//! File surface: mirrors the document to a local file.
//!
//! Uses notify-debouncer-mini to watch the file's directory. Saves become
//! `LocalEdit`s; every displayed buffer is written back to the file.

use anyhow::{Context, Result};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use textsync_core::Input;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::client::Request;

/// Change to the watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created or modified
    Modified,
    /// File was deleted
    Deleted,
}

/// Last seen mtime, to filter spurious events
type MtimeCache = Arc<Mutex<Option<SystemTime>>>;

/// Watches a single file.
pub struct FileWatcher {
    path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEventKind>,
    mtime_cache: MtimeCache,
}

impl FileWatcher {
    /// Watch `path`, which must be in an existing directory.
    ///
    /// Uses 200ms debounce period to avoid rapid-fire events during saves.
    pub fn new(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .with_context(|| format!("{} is not a file path", path.display()))?
            .to_owned();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        // Canonicalize so paths match what the platform watcher reports
        let dir = dir.canonicalize().unwrap_or(dir);
        let path = dir.join(file_name);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(None));

        let watched = path.clone();
        let cache = Arc::clone(&mtime_cache);
        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    let relevant = events.iter().any(|event| event.path == watched);
                    if relevant {
                        if let Some(kind) = Self::process_event(&watched, &cache) {
                            let _ = event_tx.send(kind);
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            path,
            _debouncer: debouncer,
            event_rx,
            mtime_cache,
        })
    }

    fn process_event(path: &Path, mtime_cache: &MtimeCache) -> Option<FileEventKind> {
        let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());

        let Ok(metadata) = std::fs::metadata(path) else {
            *cache = None;
            return Some(FileEventKind::Deleted);
        };

        if let Ok(mtime) = metadata.modified() {
            if *cache == Some(mtime) {
                // Mtime unchanged - spurious event, skip it
                return None;
            }
            *cache = Some(mtime);
        }

        debug!("File event: modified {}", path.display());
        Some(FileEventKind::Modified)
    }

    /// Remember the file's current mtime so our own write is not reported.
    fn remember_mtime(&self) {
        if let Ok(mtime) = std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            *self.mtime_cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(mtime);
        }
    }

    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEventKind> {
        &mut self.event_rx
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Mirror the document to `path` until the driver goes away.
pub async fn run_file_surface(
    path: PathBuf,
    requests: mpsc::UnboundedSender<Request>,
    mut surface_rx: mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    let mut watcher = FileWatcher::new(&path)?;
    info!("Mirroring document to {}", watcher.path().display());

    // Last text written by us or read from the file
    let mut current: Option<String> = None;

    loop {
        tokio::select! {
            displayed = surface_rx.recv() => {
                let Some(text) = displayed else {
                    break;
                };
                if current.as_deref() == Some(text.as_str()) {
                    continue;
                }
                if let Err(e) = tokio::fs::write(watcher.path(), &text).await {
                    error!("Failed to write {}: {}", watcher.path().display(), e);
                    continue;
                }
                watcher.remember_mtime();
                current = Some(text);
            }

            Some(kind) = watcher.event_rx().recv() => {
                if kind == FileEventKind::Deleted {
                    warn!("{} was deleted; it is rewritten on the next update", path.display());
                    current = None;
                    continue;
                }
                let text = match tokio::fs::read_to_string(watcher.path()).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to read {}: {}", watcher.path().display(), e);
                        continue;
                    }
                };
                if current.as_deref() == Some(text.as_str()) {
                    continue;
                }
                current = Some(text.clone());
                if requests.send(Request::Apply(Input::LocalEdit(text))).is_err() {
                    break;
                }
            }
        }
    }

    Ok(())
}
