use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::event::FileEvent;

/// Thread-safe unbounded FIFO of events with blocking drain-all.
///
/// All operations serialize through a single internal lock.
/// `drain_blocking` never spuriously returns empty: it only resolves once at
/// least one event is present, and it atomically empties the queue.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<FileEvent>>,
    notify: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Appends an event. Never blocks.
    pub fn enqueue(&self, event: FileEvent) {
        self.events.lock().unwrap().push_back(event);
        self.notify.notify_one();
    }

    /// Blocks until the queue is non-empty, then atomically returns the
    /// entire accumulated list and resets the queue to empty.
    pub async fn drain_blocking(&self) -> Vec<FileEvent> {
        loop {
            {
                let mut guard = self.events.lock().unwrap();
                if !guard.is_empty() {
                    return guard.drain(..).collect();
                }
            }
            self.notify.notified().await;
        }
    }

    /// Removes all events whose `FileInfo::filepath` equals `filepath`.
    pub fn remove_by_filepath(&self, filepath: &str) {
        self.events
            .lock()
            .unwrap()
            .retain(|e| e.file.filepath() != filepath);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FileAction;
    use crate::fileinfo::FileInfo;
    use std::sync::Arc;
    use std::time::Duration;

    fn event(path: &str) -> FileEvent {
        FileEvent::new(FileAction::Created, FileInfo::new(path, 1, 1, false))
    }

    #[tokio::test]
    async fn enqueue_then_drain_returns_all() {
        let q = EventQueue::new();
        q.enqueue(event("a"));
        q.enqueue(event("b"));
        let drained = q.drain_blocking().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn drain_blocks_until_an_event_arrives() {
        let q = Arc::new(EventQueue::new());
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.drain_blocking().await });

        // Give the drain task a chance to start waiting before we push.
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.enqueue(event("c"));

        let drained = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("drain timed out")
            .expect("drain task panicked");
        assert_eq!(drained.len(), 1);
    }

    #[tokio::test]
    async fn remove_by_filepath_drops_matching_events_only() {
        let q = EventQueue::new();
        q.enqueue(event("a"));
        q.enqueue(event("b"));
        q.enqueue(event("a"));
        q.remove_by_filepath("a");
        let drained = q.drain_blocking().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].file.filepath(), "b");
    }
}
