//! User-facing sync status events.
//!
//! The coordinator publishes events here; whoever renders the pending badge
//! or the "all synced" notification subscribes. Publishing with no
//! subscribers is fine.

pub mod state;

pub use state::{pending_badge, SyncStatus};

use tokio::sync::broadcast;

/// Notification text shown once the queue drains to empty.
pub const ALL_SYNCED_MESSAGE: &str = "All offline data synced!";

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Status(SyncStatus),
    /// Unsynced entries remaining after a cycle (or at startup).
    PendingCount(usize),
    /// The queue went from non-empty to empty.
    AllSynced,
    /// Entries skipped by automatic drains after repeated rejections.
    Held(Vec<String>),
}

/// Fan-out publisher for `SyncEvent`s.
#[derive(Clone)]
pub struct StatusReporter {
    tx: broadcast::Sender<SyncEvent>,
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SyncEvent) {
        log::debug!("Status event: {:?}", event);
        // Err only means nobody is listening
        let _ = self.tx.send(event);
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let reporter = StatusReporter::new();
        let mut rx = reporter.subscribe();

        reporter.publish(SyncEvent::PendingCount(2));
        reporter.publish(SyncEvent::AllSynced);

        assert_eq!(rx.recv().await.unwrap(), SyncEvent::PendingCount(2));
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::AllSynced);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let reporter = StatusReporter::new();
        reporter.publish(SyncEvent::Status(SyncStatus::Offline));
    }
}
