//! Connectivity tracking.
//!
//! `ConnectivityMonitor` holds the current online/offline state and fires
//! registered callbacks on transitions only. `ReachabilityProbe` feeds it
//! from a periodic backend health check, since a CLI process has no
//! platform online/offline events to listen to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::RemoteError;

/// Default interval between reachability probes (30 seconds).
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

type Listener = Box<dyn Fn() + Send + Sync>;

/// Online/offline state with edge-triggered listeners.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    on_online: Mutex<Vec<Listener>>,
    on_offline: Mutex<Vec<Listener>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
            on_online: Mutex::new(Vec::new()),
            on_offline: Mutex::new(Vec::new()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Register a callback for the offline -> online edge.
    ///
    /// Callbacks run synchronously inside `set_online` and must not register
    /// further listeners.
    pub fn on_online(&self, callback: impl Fn() + Send + Sync + 'static) {
        lock_listeners(&self.on_online).push(Box::new(callback));
    }

    /// Register a callback for the online -> offline edge.
    pub fn on_offline(&self, callback: impl Fn() + Send + Sync + 'static) {
        lock_listeners(&self.on_offline).push(Box::new(callback));
    }

    /// Record the current state. Returns `true` and notifies listeners only
    /// when the state actually changed.
    pub fn set_online(&self, online: bool) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        if online {
            log::info!("Connectivity restored");
            for listener in lock_listeners(&self.on_online).iter() {
                listener();
            }
        } else {
            log::info!("Connectivity lost, new entries will be queued locally");
            for listener in lock_listeners(&self.on_offline).iter() {
                listener();
            }
        }
        true
    }
}

fn lock_listeners(listeners: &Mutex<Vec<Listener>>) -> std::sync::MutexGuard<'_, Vec<Listener>> {
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Something that can tell whether the remote store is reachable.
#[allow(async_fn_in_trait)]
pub trait Reachability {
    async fn probe(&self) -> Result<(), RemoteError>;
}

impl<T: Reachability> Reachability for Arc<T> {
    async fn probe(&self) -> Result<(), RemoteError> {
        (**self).probe().await
    }
}

/// Periodic reachability check feeding a `ConnectivityMonitor`.
pub struct ReachabilityProbe<P> {
    target: P,
    monitor: Arc<ConnectivityMonitor>,
    interval: Duration,
}

impl<P: Reachability> ReachabilityProbe<P> {
    pub fn new(target: P, monitor: Arc<ConnectivityMonitor>, interval: Duration) -> Self {
        Self {
            target,
            monitor,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probe once and update the monitor. Returns the resulting online state.
    ///
    /// Only connectivity-class failures count as offline; an answer of any
    /// other kind proves the backend is reachable.
    pub async fn check(&self) -> bool {
        let online = match self.target.probe().await {
            Ok(()) => true,
            Err(e) if e.is_connectivity() => {
                log::debug!("Reachability probe failed: {}", e);
                false
            }
            Err(e) => {
                log::debug!("Reachability probe answered with error, treating as online: {}", e);
                true
            }
        };
        self.monitor.set_online(online);
        online
    }
}

/// Heuristic check for network-level errors vs application errors, for
/// failures that only surface as a message.
pub fn is_network_error(error: &str) -> bool {
    let network_patterns = [
        "dns error",
        "connect error",
        "connection refused",
        "connection reset",
        "network unreachable",
        "timed out",
        "timeout",
        "no route to host",
        "network is down",
        "couldn't resolve host",
    ];
    let lower = error.to_lowercase();
    network_patterns.iter().any(|p| lower.contains(p))
}
