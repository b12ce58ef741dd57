//! Offline write buffering and background sync.
//!
//! Captures made while the backend is unreachable are appended to a durable
//! queue (`queue`). The sync daemon probes reachability on an interval and,
//! on every offline -> online edge, drains the queue through the
//! `SyncCoordinator`.

pub mod coordinator;
pub mod queue;
pub mod storage;
#[cfg(test)]
pub(crate) mod mocks;

pub use coordinator::{DrainTrigger, IdentityProvider, RemoteStore, SyncCoordinator};
pub use queue::{Payload, QueueEntry, QueueStore};
pub use storage::FileStore;

use std::future::Future;

use tokio::sync::mpsc;

use crate::connectivity::{ConnectivityMonitor, Reachability, ReachabilityProbe};

/// Channel sender used to request a drain (connectivity edge or user retry).
pub type SyncTrigger = mpsc::Sender<DrainTrigger>;

/// Request a `ConnectivityRestored` drain on every offline -> online edge
/// of `monitor`.
///
/// A full channel means a drain is already requested, so the edge is dropped.
pub fn drain_on_reconnect(monitor: &ConnectivityMonitor, trigger: SyncTrigger) {
    monitor.on_online(move || {
        if let Err(e) = trigger.try_send(DrainTrigger::ConnectivityRestored) {
            log::debug!("Drain already requested: {}", e);
        }
    });
}

/// The background sync loop.
///
/// Waits on either the probe ticker or a drain request. Drains run inline,
/// one at a time, so a cycle never overlaps the next probe.
pub struct SyncDaemon<R, I, P> {
    coordinator: SyncCoordinator<R, I>,
    probe: ReachabilityProbe<P>,
    trigger_rx: mpsc::Receiver<DrainTrigger>,
}

impl<R, I, P> SyncDaemon<R, I, P>
where
    R: RemoteStore,
    I: IdentityProvider,
    P: Reachability,
{
    pub fn new(
        coordinator: SyncCoordinator<R, I>,
        probe: ReachabilityProbe<P>,
        trigger_rx: mpsc::Receiver<DrainTrigger>,
    ) -> Self {
        Self {
            coordinator,
            probe,
            trigger_rx,
        }
    }

    /// Main run loop. Returns when `shutdown` resolves.
    ///
    /// Drains once at startup if already online, then reacts to probe ticks
    /// (which fire connectivity edges) and queued drain triggers.
    pub async fn run<S: Future>(&mut self, shutdown: S) {
        tokio::pin!(shutdown);

        log::info!(
            "Sync daemon started (probe interval: {}s)",
            self.probe.interval().as_secs()
        );

        self.coordinator.on_startup().await;

        let mut ticker = tokio::time::interval(self.probe.interval());
        // The first tick fires immediately; startup already covered it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe.check().await;
                }
                Some(trigger) = self.trigger_rx.recv() => {
                    self.coordinator.drain(trigger).await;
                }
                _ = &mut shutdown => {
                    log::info!("Sync daemon stopping");
                    break;
                }
            }
        }
    }
}
