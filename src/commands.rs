//! Command handlers invoked from the CLI.
//!
//! All handlers return `Result<_, String>` for simple error propagation to
//! the command line, where `main` prints the message and exits non-zero.

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::api::ExpenseRecord;
use crate::connectivity::ConnectivityMonitor;
use crate::state::AppState;
use crate::status::{pending_badge, SyncEvent, ALL_SYNCED_MESSAGE};
use crate::sync::coordinator::{DrainOutcome, DrainReport, SkipReason, EXPENSES_TABLE};
use crate::sync::{
    drain_on_reconnect, DrainTrigger, IdentityProvider, Payload, QueueEntry, QueueStore,
    RemoteStore, SyncDaemon, SyncTrigger,
};

/// Pending drain requests buffered between connectivity edges.
const TRIGGER_CAPACITY: usize = 8;

/// Fields of the expense entry form.
#[derive(Debug, Clone, Default)]
pub struct ExpenseForm {
    pub date: String,
    pub category: String,
    pub payee: String,
    pub amount: f64,
    pub purpose: Option<String>,
    pub paid_by: Option<String>,
    pub status: Option<String>,
    /// Additional `key=value` fields captured alongside the form.
    pub extra: Vec<(String, Value)>,
}

impl ExpenseForm {
    /// Form fields as a queue payload. Named form fields win over extras.
    pub fn into_payload(self) -> Payload {
        let mut payload: Payload = self.extra.into_iter().collect();
        payload.insert("date".into(), Value::String(self.date));
        payload.insert("category".into(), Value::String(self.category));
        payload.insert("payee".into(), Value::String(self.payee));
        payload.insert("amount".into(), Value::from(self.amount));
        for (key, value) in [
            ("purpose", self.purpose),
            ("paid_by", self.paid_by),
            ("status", self.status),
        ] {
            if let Some(value) = value {
                payload.insert(key.into(), Value::String(value));
            }
        }
        payload
    }
}

/// Parse a `key=value` argument. Numbers and booleans keep their JSON type.
pub fn parse_field(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", arg))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing field name in '{}'", arg));
    }
    let value = serde_json::from_str::<Value>(raw)
        .ok()
        .filter(|v| v.is_number() || v.is_boolean())
        .unwrap_or_else(|| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Written straight to the remote store.
    Saved,
    /// Buffered locally under this queue id.
    Queued(String),
}

/// Save a captured expense.
///
/// Online: writes directly with the current user. A connectivity failure
/// flips the monitor offline and falls back to the queue. Offline: queues.
/// Remote rejections and local persistence failures are returned as errors
/// so the user never sees a false success.
pub async fn capture_expense<R: RemoteStore, I: IdentityProvider>(
    queue: &QueueStore,
    remote: &R,
    identity: &I,
    connectivity: &ConnectivityMonitor,
    payload: Payload,
) -> Result<CaptureOutcome, String> {
    // Catch type errors now rather than at replay time
    ExpenseRecord::from_payload("", &payload).map_err(|e| format!("Invalid expense: {}", e))?;

    if connectivity.is_online() {
        match write_direct(remote, identity, &payload).await {
            Ok(()) => {
                log::info!("Expense saved to remote store");
                return Ok(CaptureOutcome::Saved);
            }
            Err(DirectWriteError::Offline(e)) => {
                log::warn!("Direct write failed, queueing offline: {}", e);
                connectivity.set_online(false);
            }
            Err(DirectWriteError::Failed(message)) => return Err(message),
        }
    }

    let entry = queue
        .enqueue(payload)
        .map_err(|e| format!("Could not save expense offline: {}", e))?;
    Ok(CaptureOutcome::Queued(entry.id))
}

enum DirectWriteError {
    Offline(String),
    Failed(String),
}

async fn write_direct<R: RemoteStore, I: IdentityProvider>(
    remote: &R,
    identity: &I,
    payload: &Payload,
) -> Result<(), DirectWriteError> {
    let user_id = match identity.current_user_id().await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => return Err(DirectWriteError::Failed("Not signed in".to_string())),
        Err(e) if e.is_connectivity() => return Err(DirectWriteError::Offline(e.to_string())),
        Err(e) => return Err(DirectWriteError::Failed(e.to_string())),
    };
    let record = ExpenseRecord::from_payload(&user_id, payload)
        .map_err(|e| DirectWriteError::Failed(format!("Invalid expense: {}", e)))?;

    remote
        .insert(EXPENSES_TABLE, std::slice::from_ref(&record))
        .await
        .map_err(|e| {
            if e.is_connectivity() {
                DirectWriteError::Offline(e.to_string())
            } else {
                DirectWriteError::Failed(format!("Expense was not saved: {}", e))
            }
        })
}

/// `add`: probe once, then capture.
pub async fn add_expense(state: &AppState, form: ExpenseForm) -> Result<(), String> {
    state.probe().check().await;
    let outcome = capture_expense(
        &state.queue,
        state.api.as_ref(),
        state.api.as_ref(),
        &state.connectivity,
        form.into_payload(),
    )
    .await?;

    match outcome {
        CaptureOutcome::Saved => println!("Expense saved."),
        CaptureOutcome::Queued(id) => {
            println!("Offline: expense queued ({}).", id);
            print_badge(state.queue.count_pending().map_err(|e| e.to_string())?);
        }
    }
    Ok(())
}

/// `pending`: list unsynced entries and any held back after rejections.
pub fn show_pending(state: &AppState) -> Result<(), String> {
    let entries = state.queue.list_all().map_err(|e| e.to_string())?;
    let failures = state.queue.failures().map_err(|e| e.to_string())?;
    let (synced, pending): (Vec<QueueEntry>, Vec<QueueEntry>) =
        entries.into_iter().partition(|e| e.synced);

    if !synced.is_empty() {
        println!("{} synced entries awaiting prune.", synced.len());
    }
    if pending.is_empty() {
        println!("No offline entries.");
        return Ok(());
    }

    print_badge(pending.len());
    for entry in &pending {
        let note = match failures.get(&entry.id) {
            Some(f) if f.attempts >= state.settings.max_rejections => {
                format!("  [held after {} rejections: {}]", f.attempts, f.last_error)
            }
            Some(f) => format!("  [rejected {}x: {}]", f.attempts, f.last_error),
            None => String::new(),
        };
        println!("{}{}", describe(entry), note);
    }
    Ok(())
}

/// `sync`: probe, then a manual drain (which also retries held entries).
pub async fn sync_now(state: &AppState) -> Result<DrainOutcome, String> {
    if !state.probe().check().await {
        let pending = state.queue.count_pending().map_err(|e| e.to_string())?;
        println!("Backend unreachable; {} entries stay queued.", pending);
        return Ok(DrainOutcome::Skipped(SkipReason::Offline));
    }

    let outcome = state.coordinator().drain(DrainTrigger::Manual).await;
    match &outcome {
        DrainOutcome::Skipped(reason) => println!("Nothing synced ({:?}).", reason),
        DrainOutcome::Completed(report) => print_report(report),
    }
    Ok(outcome)
}

/// `prune`: drop synced entries left behind by an interrupted cycle.
pub fn prune(state: &AppState) -> Result<usize, String> {
    let removed = state.queue.prune().map_err(|e| e.to_string())?;
    println!("Removed {} synced entries.", removed);
    Ok(removed)
}

/// `watch`: run the sync daemon until Ctrl-C.
///
/// Drains at startup when the backend is reachable and on every
/// offline -> online edge after that.
pub async fn watch(state: &AppState) -> Result<(), String> {
    let (trigger_tx, trigger_rx): (SyncTrigger, _) = mpsc::channel(TRIGGER_CAPACITY);

    // Establish the initial state first so startup does not also count as an edge
    let probe = state.probe();
    probe.check().await;

    drain_on_reconnect(&state.connectivity, trigger_tx);
    state
        .connectivity
        .on_offline(|| log::warn!("Offline: new expenses will be queued locally"));

    tokio::spawn(print_events(state.status.subscribe()));

    let mut daemon = SyncDaemon::new(state.coordinator(), probe, trigger_rx);
    daemon.run(tokio::signal::ctrl_c()).await;
    Ok(())
}

async fn print_events(mut rx: broadcast::Receiver<SyncEvent>) {
    loop {
        match rx.recv().await {
            Ok(SyncEvent::Status(status)) => log::info!("Sync status: {}", status.label()),
            Ok(SyncEvent::PendingCount(count)) => print_badge(count),
            Ok(SyncEvent::AllSynced) => println!("{}", ALL_SYNCED_MESSAGE),
            Ok(SyncEvent::Held(ids)) => {
                println!(
                    "{} entries held after repeated rejections; run `sync` to retry: {}",
                    ids.len(),
                    ids.join(", ")
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Status printer fell behind, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_badge(count: usize) {
    if let Some(badge) = pending_badge(count) {
        println!("📴 {}", badge);
    }
}

fn print_report(report: &DrainReport) {
    println!(
        "Synced {} of {} attempted ({} rejected, {} malformed); {} remaining.",
        report.synced, report.attempted, report.rejected, report.malformed, report.remaining
    );
    if let Some(reason) = report.aborted {
        println!("Stopped early: {:?}", reason);
    }
    if report.remaining == 0 {
        println!("{}", ALL_SYNCED_MESSAGE);
    }
}

fn describe(entry: &QueueEntry) -> String {
    let field = |name: &str| match entry.payload.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    };
    format!(
        "{}  {}  {}  {}  {}",
        entry.id,
        field("date"),
        field("category"),
        field("payee"),
        field("amount")
    )
}
