//! Persistent offline queue for expense writes.
//!
//! When an expense is captured while the remote store is unreachable, its
//! form fields are appended to a JSON log kept in a `KeyValueStore`. Entries
//! stay in the log until a confirmed remote insert marks them synced, after
//! which `prune()` removes them.
//!
//! Every operation re-reads the log from storage, so producers (capture path)
//! and the consumer (sync coordinator) never work from a stale snapshot.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::storage::{KeyValueStore, StorageError, StoreLock};

/// Storage key holding the serialized queue (same name the web app uses).
pub const QUEUE_KEY: &str = "expensepro_offline_queue";

/// Storage key holding per-entry remote rejection bookkeeping.
pub const FAILURES_KEY: &str = "expensepro_offline_failures";

/// Field names owned by the queue; stripped from captured payloads.
const RESERVED_FIELDS: [&str; 3] = ["queue_id", "timestamp", "synced"];

/// Captured form fields, keyed by field name.
pub type Payload = Map<String, Value>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("offline queue could not be persisted: {0}")]
    Persistence(#[from] StorageError),
    #[error("offline queue '{key}' is unreadable: {source}")]
    Serialization {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("offline queue lock poisoned")]
    Poisoned,
}

/// A single buffered write awaiting confirmed delivery.
///
/// Serialized flat: `{ queue_id, ...payload, timestamp, synced }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Random 128-bit hex id assigned at enqueue time.
    #[serde(rename = "queue_id", default)]
    pub id: String,
    /// Captured form fields (date, category, payee, amount, ...).
    #[serde(flatten)]
    pub payload: Payload,
    /// Capture time in Unix milliseconds. Non-decreasing in queue order.
    pub timestamp: u64,
    /// Set once the remote store confirmed the write.
    #[serde(default)]
    pub synced: bool,
}

/// Remote rejection history for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub attempts: u32,
    pub last_error: String,
    pub last_attempt: u64,
}

/// One element of the persisted log. Undecodable elements are carried
/// through rewrites untouched.
enum Slot {
    Entry(QueueEntry),
    Corrupt(Value),
}

/// Held for one read-modify-write: the in-process mutex, then the store's
/// cross-process lock.
struct QueueGuard<'a> {
    _store: StoreLock,
    _local: MutexGuard<'a, ()>,
}

/// Durable, append-only log of pending expense writes.
///
/// Every operation holds the store lock from load to save, so a capture in
/// one process and a drain in another never overwrite each other's changes.
pub struct QueueStore {
    storage: Box<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl QueueStore {
    pub fn new(storage: impl KeyValueStore + 'static) -> Self {
        Self {
            storage: Box::new(storage),
            lock: Mutex::new(()),
        }
    }

    /// Append a payload as a new unsynced entry and persist it.
    ///
    /// Returns the stored entry. Fails if the log cannot be read back or the
    /// write is not confirmed by storage; nothing is reported as queued then.
    pub fn enqueue(&self, mut payload: Payload) -> Result<QueueEntry, QueueError> {
        for field in RESERVED_FIELDS {
            payload.remove(field);
        }

        let _guard = self.guard()?;
        let mut slots = self.load()?;

        let last_timestamp = slots
            .iter()
            .rev()
            .find_map(|slot| match slot {
                Slot::Entry(e) => Some(e.timestamp),
                Slot::Corrupt(_) => None,
            })
            .unwrap_or(0);

        let entry = QueueEntry {
            id: new_queue_id(),
            payload,
            timestamp: now_ms().max(last_timestamp),
            synced: false,
        };
        slots.push(Slot::Entry(entry.clone()));

        if let Err(e) = self.save(&slots) {
            log::error!("Failed to persist offline entry: {}", e);
            return Err(e);
        }

        log::info!(
            "Queued offline entry {} ({} pending)",
            entry.id,
            pending_in(&slots).count()
        );
        Ok(entry)
    }

    /// All unsynced entries, oldest first.
    pub fn list_pending(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let _guard = self.guard()?;
        let slots = self.load()?;
        Ok(pending_in(&slots).cloned().collect())
    }

    /// Every decodable entry, synced or not, in log order.
    pub fn list_all(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let _guard = self.guard()?;
        let slots = self.load()?;
        Ok(slots
            .into_iter()
            .filter_map(|slot| match slot {
                Slot::Entry(e) => Some(e),
                Slot::Corrupt(_) => None,
            })
            .collect())
    }

    pub fn count_pending(&self) -> Result<usize, QueueError> {
        let _guard = self.guard()?;
        let slots = self.load()?;
        Ok(pending_in(&slots).count())
    }

    /// Flag the entry with `id` as synced.
    ///
    /// Returns `true` if the flag changed. Unknown or already-synced ids are
    /// a no-op and nothing is written.
    pub fn mark_synced(&self, id: &str) -> Result<bool, QueueError> {
        let _guard = self.guard()?;
        let mut slots = self.load()?;

        let target = slots.iter_mut().find_map(|slot| match slot {
            Slot::Entry(e) if e.id == id => Some(e),
            _ => None,
        });

        match target {
            Some(entry) if !entry.synced => {
                entry.synced = true;
            }
            Some(_) => return Ok(false),
            None => {
                log::debug!("mark_synced: entry {} not in queue", id);
                return Ok(false);
            }
        }

        self.save(&slots)?;
        Ok(true)
    }

    /// Remove every synced entry from the log. Unsynced and undecodable
    /// entries are kept. Returns the number of entries removed.
    pub fn prune(&self) -> Result<usize, QueueError> {
        let _guard = self.guard()?;
        let slots = self.load()?;
        let before = slots.len();

        let kept: Vec<Slot> = slots
            .into_iter()
            .filter(|slot| !matches!(slot, Slot::Entry(e) if e.synced))
            .collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }
        self.save(&kept)?;

        // Drop ledger rows for entries that no longer exist
        let mut failures = self.load_failures();
        let before_failures = failures.len();
        failures.retain(|id, _| {
            kept.iter()
                .any(|slot| matches!(slot, Slot::Entry(e) if &e.id == id))
        });
        if failures.len() != before_failures {
            self.save_failures(&failures)?;
        }

        log::debug!("Pruned {} synced entries", removed);
        Ok(removed)
    }

    /// Record a remote rejection for `id`. Returns the updated attempt count.
    pub fn record_failure(&self, id: &str, error: &str) -> Result<u32, QueueError> {
        let _guard = self.guard()?;
        let mut failures = self.load_failures();
        let record = failures
            .entry(id.to_string())
            .or_insert_with(|| FailureRecord {
                attempts: 0,
                last_error: String::new(),
                last_attempt: 0,
            });
        record.attempts += 1;
        record.last_error = error.to_string();
        record.last_attempt = now_ms();
        let attempts = record.attempts;
        self.save_failures(&failures)?;
        Ok(attempts)
    }

    /// Forget the rejection history for `id`.
    pub fn clear_failure(&self, id: &str) -> Result<(), QueueError> {
        let _guard = self.guard()?;
        let mut failures = self.load_failures();
        if failures.remove(id).is_some() {
            self.save_failures(&failures)?;
        }
        Ok(())
    }

    pub fn failures(&self) -> Result<BTreeMap<String, FailureRecord>, QueueError> {
        let _guard = self.guard()?;
        Ok(self.load_failures())
    }

    fn guard(&self) -> Result<QueueGuard<'_>, QueueError> {
        let local = self.lock.lock().map_err(|_| QueueError::Poisoned)?;
        let store = self.storage.lock()?;
        Ok(QueueGuard {
            _store: store,
            _local: local,
        })
    }

    fn load(&self) -> Result<Vec<Slot>, QueueError> {
        let raw = match self.storage.get(QUEUE_KEY)? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };

        let values: Vec<Value> =
            serde_json::from_str(&raw).map_err(|source| QueueError::Serialization {
                key: QUEUE_KEY,
                source,
            })?;

        Ok(values
            .into_iter()
            .enumerate()
            .map(|(index, value)| match QueueEntry::deserialize(&value) {
                Ok(mut entry) => {
                    // Entries written by the web app carry no id
                    if entry.id.is_empty() {
                        entry.id = format!("legacy-{}-{}", index, entry.timestamp);
                    }
                    Slot::Entry(entry)
                }
                Err(e) => {
                    log::warn!("Skipping undecodable queue entry #{}: {}", index, e);
                    Slot::Corrupt(value)
                }
            })
            .collect())
    }

    fn save(&self, slots: &[Slot]) -> Result<(), QueueError> {
        let values = slots
            .iter()
            .map(|slot| match slot {
                Slot::Entry(e) => serde_json::to_value(e),
                Slot::Corrupt(v) => Ok(v.clone()),
            })
            .collect::<Result<Vec<Value>, _>>()
            .map_err(|source| QueueError::Serialization {
                key: QUEUE_KEY,
                source,
            })?;
        let text = serde_json::to_string(&values).map_err(|source| QueueError::Serialization {
            key: QUEUE_KEY,
            source,
        })?;
        self.storage.set(QUEUE_KEY, &text)?;
        Ok(())
    }

    /// The ledger is advisory: an unreadable one starts over empty.
    fn load_failures(&self) -> BTreeMap<String, FailureRecord> {
        let raw = match self.storage.get(FAILURES_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return BTreeMap::new(),
            Err(e) => {
                log::warn!("Failure ledger unreadable, starting empty: {}", e);
                return BTreeMap::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!("Failure ledger corrupt, starting empty: {}", e);
            BTreeMap::new()
        })
    }

    fn save_failures(&self, failures: &BTreeMap<String, FailureRecord>) -> Result<(), QueueError> {
        let text = serde_json::to_string(failures).map_err(|source| QueueError::Serialization {
            key: FAILURES_KEY,
            source,
        })?;
        self.storage.set(FAILURES_KEY, &text)?;
        Ok(())
    }
}

fn pending_in(slots: &[Slot]) -> impl Iterator<Item = &QueueEntry> {
    slots.iter().filter_map(|slot| match slot {
        Slot::Entry(e) if !e.synced => Some(e),
        _ => None,
    })
}

fn new_queue_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
