//! Scripted remote store, identity and reachability doubles shared by sync
//! and command tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::api::{ExpenseRecord, RemoteError};

use super::coordinator::{IdentityProvider, RemoteStore};
use crate::connectivity::Reachability;

/// Mock remote store that replays a script of results, one per insert call.
/// Calls past the end of the script succeed.
pub struct ScriptedRemote {
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    calls: Mutex<Vec<ExpenseRecord>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    pub fn with_script(script: Vec<Result<(), RemoteError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Append more results to the script.
    pub fn push(&self, result: Result<(), RemoteError>) {
        self.script.lock().unwrap().push_back(result);
    }

    /// Every row passed to `insert`, in call order (including failed calls).
    pub fn calls(&self) -> Vec<ExpenseRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Amounts of every attempted row, in call order.
    pub fn amounts(&self) -> Vec<f64> {
        self.calls()
            .iter()
            .map(|r| r.amount.unwrap_or_default())
            .collect()
    }
}

impl RemoteStore for ScriptedRemote {
    async fn insert(&self, table: &str, rows: &[ExpenseRecord]) -> Result<(), RemoteError> {
        assert_eq!(table, "expenses");
        // Suspend like a real network call so interleavings are exercised
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().extend(rows.iter().cloned());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Mock identity whose signed-in user can be swapped mid-test.
pub struct SwitchableIdentity {
    user: Mutex<Option<String>>,
    lookups: AtomicU32,
}

impl SwitchableIdentity {
    pub fn signed_in(user: &str) -> Self {
        Self {
            user: Mutex::new(Some(user.to_string())),
            lookups: AtomicU32::new(0),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            user: Mutex::new(None),
            lookups: AtomicU32::new(0),
        }
    }

    pub fn switch_to(&self, user: Option<&str>) {
        *self.user.lock().unwrap() = user.map(|u| u.to_string());
    }

    pub fn lookups(&self) -> u32 {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for SwitchableIdentity {
    async fn current_user_id(&self) -> Result<Option<String>, RemoteError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.user.lock().unwrap().clone())
    }
}

/// Mock health check answering from a script, then succeeding.
pub struct ScriptedReachability {
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    checks: AtomicU32,
}

impl ScriptedReachability {
    pub fn with_script(script: Vec<Result<(), RemoteError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            checks: AtomicU32::new(0),
        }
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

impl Reachability for ScriptedReachability {
    async fn probe(&self) -> Result<(), RemoteError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

pub fn rejected(message: &str) -> Result<(), RemoteError> {
    Err(RemoteError::Rejected {
        status: 400,
        message: message.to_string(),
    })
}

pub fn offline() -> Result<(), RemoteError> {
    Err(RemoteError::Connectivity("connection refused".to_string()))
}
