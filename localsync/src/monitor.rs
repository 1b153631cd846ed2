//! C5: Monitor. Wraps the event queue (C3) and directory observer (C4),
//! adding two "ignore sets" so self-induced changes (downloads and local
//! deletes the peer itself performs in response to a broadcast index)
//! don't loop back as if they were independently-observed local edits.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::event::{FileAction, FileEvent};
use crate::fileinfo::is_hidden_path;
use crate::observer::{DirectoryObserver, ObserverError};
use crate::queue::EventQueue;

/// The heuristic post-settle delay before an ignore entry is cleared.
/// Spec §4.2/§9: papers over notification latency; a known fragile point,
/// not something this implementation attempts to fix with versioning.
pub const IGNORE_SETTLE_DELAY: Duration = Duration::from_millis(300);

#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error("observer error: {0}")]
    Observer(#[from] ObserverError),
}

/// Shared handle to one ignore set (`ignore_modify` or `ignore_delete`).
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet(Arc<Mutex<HashSet<String>>>);

impl IgnoreSet {
    pub async fn mark(&self, path: &str) {
        self.0.lock().await.insert(path.to_string());
    }

    pub async fn unmark(&self, path: &str) {
        self.0.lock().await.remove(path);
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.0.lock().await.contains(path)
    }

    /// Marks `path`, waits the settle delay, then unmarks it. Spawned as a
    /// detached task by callers that apply a single self-induced change.
    pub fn mark_then_settle(self, path: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.mark(&path).await;
        })
    }

    pub fn clear_after_settle(self, path: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(IGNORE_SETTLE_DELAY).await;
            self.unmark(&path).await;
        })
    }
}

pub struct Monitor {
    queue: Arc<EventQueue>,
    ignore_modify: IgnoreSet,
    ignore_delete: IgnoreSet,
    observer: DirectoryObserver,
    filter_task: JoinHandle<()>,
}

impl Monitor {
    /// Starts watching `root`. Spawns the background filter task that reads
    /// raw events from the observer and enqueues the surviving ones.
    pub fn start(root: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<FileEvent>();
        let observer = DirectoryObserver::start(root.as_ref(), raw_tx)?;

        let queue = Arc::new(EventQueue::new());
        let ignore_modify = IgnoreSet::default();
        let ignore_delete = IgnoreSet::default();

        let task_queue = queue.clone();
        let task_ignore_modify = ignore_modify.clone();
        let task_ignore_delete = ignore_delete.clone();

        let filter_task = tokio::spawn(async move {
            while let Some(event) = raw_rx.recv().await {
                if should_suppress(&event, &task_ignore_modify, &task_ignore_delete).await {
                    tracing::trace!("suppressing self-induced event: {}", event);
                    continue;
                }
                task_queue.enqueue(event);
            }
        });

        Ok(Self {
            queue,
            ignore_modify,
            ignore_delete,
            observer,
            filter_task,
        })
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn ignore_modify(&self) -> &IgnoreSet {
        &self.ignore_modify
    }

    pub fn ignore_delete(&self) -> &IgnoreSet {
        &self.ignore_delete
    }

    pub fn root(&self) -> &Path {
        self.observer.root()
    }

    pub fn stop(self) {
        self.filter_task.abort();
    }
}

async fn should_suppress(event: &FileEvent, ignore_modify: &IgnoreSet, ignore_delete: &IgnoreSet) -> bool {
    let path = event.file.filepath();
    if is_hidden_path(path) {
        return true;
    }
    match event.action {
        FileAction::Created | FileAction::Modified => ignore_modify.contains(path).await,
        FileAction::Deleted => ignore_delete.contains(path).await,
        FileAction::DownloadComplete => false,
    }
}
