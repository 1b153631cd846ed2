//! C4: directory observer. External collaborator, OS-specific: produces
//! `FileEvent`s from OS-level filesystem notifications. Wraps `notify`'s
//! `RecommendedWatcher` so the rest of the system never deals with a
//! platform notification API directly.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::event::{FileAction, FileEvent};
use crate::fileinfo::FileInfo;

#[derive(thiserror::Error, Debug)]
pub enum ObserverError {
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ObserverError>;

/// Watches `root` recursively, translating raw notifications into
/// `FileEvent`s relative to `root` and forwarding them on `tx`.
///
/// Returned handle must be kept alive for as long as watching should
/// continue; dropping it stops the underlying OS watch.
pub struct DirectoryObserver {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl DirectoryObserver {
    pub fn start(root: impl Into<PathBuf>, tx: mpsc::UnboundedSender<FileEvent>) -> Result<Self> {
        let root = root.into();
        let watch_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("observer error: {}", e);
                    return;
                }
            };
            for file_event in translate(&watch_root, &event) {
                if tx.send(file_event).is_err() {
                    // Receiver gone; the monitor has shut down.
                }
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            _watcher: watcher,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Translates one raw `notify::Event` into zero or more `FileEvent`s,
/// relative to `root`. A single notification can name several paths.
fn translate(root: &Path, event: &Event) -> Vec<FileEvent> {
    let action = match event.kind {
        EventKind::Create(_) => FileAction::Created,
        EventKind::Modify(_) => FileAction::Modified,
        EventKind::Remove(_) => FileAction::Deleted,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter_map(|p| to_file_event(root, p, action))
        .collect()
}

fn to_file_event(root: &Path, path: &Path, action: FileAction) -> Option<FileEvent> {
    let rel = path.strip_prefix(root).ok()?.to_str()?.replace('\\', "/");
    if rel.is_empty() {
        return None;
    }

    let file = if action == FileAction::Deleted {
        // The path no longer exists; synthesize size 0, last_modified = now,
        // per spec §3.
        FileInfo::now_deleted(rel)
    } else {
        let metadata = std::fs::metadata(path).ok()?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or_else(|| now_secs());
        FileInfo::new(rel, metadata.len(), last_modified, metadata.is_dir())
    };

    Some(FileEvent::new(action, file))
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
