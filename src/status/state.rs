//! Sync status shown by the pending-entries indicator.

/// All states the sync subsystem can report.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    /// No drain in progress.
    Idle,
    /// A drain cycle is replaying queued entries.
    Syncing,
    /// Backend unreachable, captures go to the offline queue.
    Offline,
    /// Last drain left nothing pending.
    Synced,
    /// Local storage failed (with human-readable description).
    Error(String),
}

impl SyncStatus {
    pub fn label(&self) -> &str {
        match self {
            SyncStatus::Idle => "Idle",
            SyncStatus::Syncing => "Syncing...",
            SyncStatus::Offline => "Offline",
            SyncStatus::Synced => "Synced",
            SyncStatus::Error(_) => "Error",
        }
    }
}

/// Text for the pending-entries badge, `None` when nothing is pending.
pub fn pending_badge(count: usize) -> Option<String> {
    if count == 0 {
        None
    } else {
        Some(format!("{} offline entry(s)", count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(SyncStatus::Idle.label(), "Idle");
        assert_eq!(SyncStatus::Syncing.label(), "Syncing...");
        assert_eq!(SyncStatus::Offline.label(), "Offline");
        assert_eq!(SyncStatus::Synced.label(), "Synced");
        assert_eq!(SyncStatus::Error("disk full".into()).label(), "Error");
    }

    #[test]
    fn test_pending_badge() {
        assert_eq!(pending_badge(0), None);
        assert_eq!(pending_badge(1).as_deref(), Some("1 offline entry(s)"));
        assert_eq!(pending_badge(3).as_deref(), Some("3 offline entry(s)"));
    }
}
