//! Application state shared by the CLI commands.
//!
//! Holds the API client, the offline queue, the connectivity monitor and the
//! status reporter, all behind `Arc` so the capture path and the sync daemon
//! see the same instances.

use std::sync::Arc;

use crate::api::ApiClient;
use crate::config::Settings;
use crate::connectivity::{ConnectivityMonitor, ReachabilityProbe};
use crate::status::StatusReporter;
use crate::sync::{FileStore, QueueStore, SyncCoordinator};

pub struct AppState {
    /// HTTP client for the expenses backend (also the identity source).
    pub api: Arc<ApiClient>,

    /// Durable offline queue.
    pub queue: Arc<QueueStore>,

    /// Current online/offline state. Starts offline until the first probe.
    pub connectivity: Arc<ConnectivityMonitor>,

    pub status: StatusReporter,

    pub settings: Settings,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let api = ApiClient::new(
            &settings.api_url,
            settings.api_key.clone(),
            settings.access_token.clone(),
        );
        let store = FileStore::new(&settings.queue_dir).with_quota(settings.queue_max_bytes);
        log::debug!("Offline queue directory: {}", store.dir().display());

        Self {
            api: Arc::new(api),
            queue: Arc::new(QueueStore::new(store)),
            connectivity: Arc::new(ConnectivityMonitor::new(false)),
            status: StatusReporter::new(),
            settings,
        }
    }

    /// A coordinator writing through the shared API client.
    pub fn coordinator(&self) -> SyncCoordinator<Arc<ApiClient>, Arc<ApiClient>> {
        SyncCoordinator::new(
            self.queue.clone(),
            self.api.clone(),
            self.api.clone(),
            self.connectivity.clone(),
            self.status.clone(),
        )
        .with_max_rejections(self.settings.max_rejections)
    }

    /// A reachability probe against the backend health endpoint.
    pub fn probe(&self) -> ReachabilityProbe<Arc<ApiClient>> {
        ReachabilityProbe::new(
            self.api.clone(),
            self.connectivity.clone(),
            self.settings.probe_interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(dir: &std::path::Path) -> Settings {
        Settings {
            api_url: "http://127.0.0.1:9".to_string(),
            api_key: Some("anon".to_string()),
            access_token: None,
            queue_dir: dir.to_path_buf(),
            probe_interval: Duration::from_secs(1),
            max_rejections: 3,
            queue_max_bytes: None,
        }
    }

    #[test]
    fn test_new_state_starts_offline_with_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(settings(dir.path()));
        assert!(!state.connectivity.is_online());
        assert_eq!(state.queue.count_pending().unwrap(), 0);
        assert_eq!(state.api.base_url(), "http://127.0.0.1:9");
        assert_eq!(state.probe().interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_probe_against_unreachable_backend_stays_offline() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(settings(dir.path()));
        assert!(!state.probe().check().await);
        assert!(!state.connectivity.is_online());
    }
}
