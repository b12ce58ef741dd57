//! Replays the offline queue against the remote store.
//!
//! A drain cycle lists pending entries oldest-first and writes them one at a
//! time. Each confirmed write is marked synced immediately. A rejected entry
//! stays queued and the cycle moves on; a connectivity failure ends the cycle
//! and leaves the rest for the next connectivity-restored event.

use std::sync::{Arc, Mutex};

use super::queue::QueueStore;
use crate::api::{ExpenseRecord, RemoteError};
use crate::connectivity::ConnectivityMonitor;
use crate::status::{StatusReporter, SyncEvent, SyncStatus};

/// Remote table queued expenses are written to.
pub const EXPENSES_TABLE: &str = "expenses";

/// Rejections after which an entry is held back from automatic drains.
pub const DEFAULT_MAX_REJECTIONS: u32 = 5;

/// Trait abstracting the remote insert for testability.
///
/// In production, `ApiClient` implements this via a REST insert. In tests, a
/// scripted mock controls success/failure per call.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    async fn insert(&self, table: &str, rows: &[ExpenseRecord]) -> Result<(), RemoteError>;
}

/// Resolves the signed-in user at the moment a write is sent.
#[allow(async_fn_in_trait)]
pub trait IdentityProvider {
    /// `Ok(None)` when nobody is signed in.
    async fn current_user_id(&self) -> Result<Option<String>, RemoteError>;
}

impl<T: RemoteStore> RemoteStore for Arc<T> {
    async fn insert(&self, table: &str, rows: &[ExpenseRecord]) -> Result<(), RemoteError> {
        (**self).insert(table, rows).await
    }
}

impl<T: IdentityProvider> IdentityProvider for Arc<T> {
    async fn current_user_id(&self) -> Result<Option<String>, RemoteError> {
        (**self).current_user_id().await
    }
}

/// What started a drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    /// Application start while already online.
    Startup,
    /// Offline -> online edge.
    ConnectivityRestored,
    /// User-requested retry. Also retries held entries.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyDraining,
    Offline,
    NothingPending,
    StoreUnavailable,
}

/// Why a cycle stopped before reaching the end of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Connectivity,
    NoSession,
    Storage,
}

/// Summary of a completed drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Remote writes issued.
    pub attempted: usize,
    pub synced: usize,
    pub rejected: usize,
    /// Entries whose payload could not be turned into a row.
    pub malformed: usize,
    /// Entries currently held back after repeated rejections.
    pub held: Vec<String>,
    /// Unsynced entries left after the cycle.
    pub remaining: usize,
    pub aborted: Option<AbortReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Skipped(SkipReason),
    Completed(DrainReport),
}

/// Resets the coordinator to `Idle` however the cycle ends.
struct DrainGuard<'a> {
    state: &'a Mutex<DrainState>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = DrainState::Idle;
    }
}

/// Drives replay of the offline queue.
pub struct SyncCoordinator<R, I> {
    queue: Arc<QueueStore>,
    remote: R,
    identity: I,
    connectivity: Arc<ConnectivityMonitor>,
    status: StatusReporter,
    max_rejections: u32,
    state: Mutex<DrainState>,
}

impl<R: RemoteStore, I: IdentityProvider> SyncCoordinator<R, I> {
    pub fn new(
        queue: Arc<QueueStore>,
        remote: R,
        identity: I,
        connectivity: Arc<ConnectivityMonitor>,
        status: StatusReporter,
    ) -> Self {
        Self {
            queue,
            remote,
            identity,
            connectivity,
            status,
            max_rejections: DEFAULT_MAX_REJECTIONS,
            state: Mutex::new(DrainState::Idle),
        }
    }

    pub fn with_max_rejections(mut self, max_rejections: u32) -> Self {
        self.max_rejections = max_rejections.max(1);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> DrainState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish the pending count, then drain if already online.
    pub async fn on_startup(&self) -> DrainOutcome {
        match self.queue.count_pending() {
            Ok(count) => self.status.publish(SyncEvent::PendingCount(count)),
            Err(e) => log::error!("Could not read offline queue at startup: {}", e),
        }
        if !self.connectivity.is_online() {
            self.status.publish(SyncEvent::Status(SyncStatus::Offline));
            return DrainOutcome::Skipped(SkipReason::Offline);
        }
        self.drain(DrainTrigger::Startup).await
    }

    fn begin(&self) -> Option<DrainGuard<'_>> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state == DrainState::Draining {
            return None;
        }
        *state = DrainState::Draining;
        Some(DrainGuard { state: &self.state })
    }

    /// Run one drain cycle.
    ///
    /// A trigger that arrives while a cycle is running is a no-op. Failures
    /// are absorbed into the report and status events; nothing is returned
    /// as an error.
    pub async fn drain(&self, trigger: DrainTrigger) -> DrainOutcome {
        let Some(_guard) = self.begin() else {
            log::debug!("Drain already in progress, ignoring {:?} trigger", trigger);
            return DrainOutcome::Skipped(SkipReason::AlreadyDraining);
        };

        if !self.connectivity.is_online() {
            return DrainOutcome::Skipped(SkipReason::Offline);
        }

        // Always re-read: the capture path may have appended since last cycle
        let pending = match self.queue.list_pending() {
            Ok(pending) => pending,
            Err(e) => {
                log::error!("Offline queue unreadable, skipping sync: {}", e);
                self.status
                    .publish(SyncEvent::Status(SyncStatus::Error(e.to_string())));
                return DrainOutcome::Skipped(SkipReason::StoreUnavailable);
            }
        };
        if pending.is_empty() {
            return DrainOutcome::Skipped(SkipReason::NothingPending);
        }

        let failures = self.queue.failures().unwrap_or_default();

        log::info!(
            "Syncing {} offline entries ({:?})",
            pending.len(),
            trigger
        );
        self.status.publish(SyncEvent::Status(SyncStatus::Syncing));

        let mut report = DrainReport::default();

        for entry in &pending {
            let held = failures
                .get(&entry.id)
                .is_some_and(|f| f.attempts >= self.max_rejections);
            if held && trigger != DrainTrigger::Manual {
                log::debug!("Skipping held entry {}", entry.id);
                report.held.push(entry.id.clone());
                continue;
            }

            let user_id = match self.identity.current_user_id().await {
                Ok(Some(user_id)) => user_id,
                Ok(None) => {
                    log::warn!("No active session, leaving remaining entries queued");
                    report.aborted = Some(AbortReason::NoSession);
                    break;
                }
                Err(e) if e.is_connectivity() => {
                    log::warn!("Connectivity lost while resolving session: {}", e);
                    self.connectivity.set_online(false);
                    report.aborted = Some(AbortReason::Connectivity);
                    break;
                }
                Err(e) => {
                    log::warn!("Could not resolve current user: {}", e);
                    report.aborted = Some(AbortReason::NoSession);
                    break;
                }
            };

            let record = match ExpenseRecord::from_payload(&user_id, &entry.payload) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("Queued entry {} is malformed, skipping: {}", entry.id, e);
                    report.malformed += 1;
                    continue;
                }
            };

            report.attempted += 1;
            match self
                .remote
                .insert(EXPENSES_TABLE, std::slice::from_ref(&record))
                .await
            {
                Ok(()) => {
                    if let Err(e) = self.queue.mark_synced(&entry.id) {
                        // Written remotely but not recorded locally: stop before
                        // anything else can be resent.
                        log::error!(
                            "Entry {} was written but could not be marked synced: {}",
                            entry.id,
                            e
                        );
                        report.aborted = Some(AbortReason::Storage);
                        break;
                    }
                    if failures.contains_key(&entry.id) {
                        if let Err(e) = self.queue.clear_failure(&entry.id) {
                            log::warn!("Could not clear failure history for {}: {}", entry.id, e);
                        }
                    }
                    log::debug!("Synced offline entry {}", entry.id);
                    report.synced += 1;
                }
                Err(e) if e.is_connectivity() => {
                    log::warn!("Connectivity lost while syncing entry {}: {}", entry.id, e);
                    self.connectivity.set_online(false);
                    report.aborted = Some(AbortReason::Connectivity);
                    break;
                }
                Err(e @ RemoteError::Unauthorized { .. }) => {
                    log::warn!("Session rejected by backend, stopping sync: {}", e);
                    report.aborted = Some(AbortReason::NoSession);
                    break;
                }
                Err(e) => {
                    report.rejected += 1;
                    match self.queue.record_failure(&entry.id, &e.to_string()) {
                        Ok(attempts) if attempts >= self.max_rejections => {
                            log::error!(
                                "Entry {} rejected {} times, holding it for manual retry: {}",
                                entry.id,
                                attempts,
                                e
                            );
                            report.held.push(entry.id.clone());
                        }
                        Ok(attempts) => {
                            log::warn!(
                                "Entry {} rejected ({}/{}): {}",
                                entry.id,
                                attempts,
                                self.max_rejections,
                                e
                            );
                        }
                        Err(err) => {
                            log::error!("Could not record rejection for {}: {}", entry.id, err);
                        }
                    }
                }
            }
        }

        if let Err(e) = self.queue.prune() {
            log::warn!("Pruning synced entries failed: {}", e);
        }

        report.remaining = self
            .queue
            .count_pending()
            .unwrap_or(pending.len() - report.synced);

        self.finish(&report);
        DrainOutcome::Completed(report)
    }

    fn finish(&self, report: &DrainReport) {
        log::info!(
            "Sync cycle finished: {} synced, {} rejected, {} malformed, {} remaining",
            report.synced,
            report.rejected,
            report.malformed,
            report.remaining
        );

        self.status.publish(SyncEvent::PendingCount(report.remaining));
        if !report.held.is_empty() {
            self.status.publish(SyncEvent::Held(report.held.clone()));
        }

        let status = match report.aborted {
            Some(AbortReason::Connectivity) => SyncStatus::Offline,
            Some(AbortReason::Storage) => {
                SyncStatus::Error("offline queue could not be updated".to_string())
            }
            _ if report.remaining == 0 => SyncStatus::Synced,
            _ => SyncStatus::Idle,
        };
        self.status.publish(SyncEvent::Status(status));

        // Only reached when the cycle started with pending entries
        if report.remaining == 0 {
            self.status.publish(SyncEvent::AllSynced);
        }
    }
}
