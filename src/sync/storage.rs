//! Key-value persistence backends for the offline queue.
//!
//! The queue only needs "read a string under a key" and "write a string
//! under a key", plus an exclusive lock around read-modify-write. `FileStore`
//! keeps one file per key in a data directory and replaces it atomically on
//! every write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Default byte budget for a single stored value (5 MiB).
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage quota exceeded for '{key}': {size} bytes > {quota} bytes")]
    QuotaExceeded { key: String, size: usize, quota: usize },
}

/// Name of the advisory lock file inside a `FileStore` directory.
const LOCK_FILE: &str = ".expensepro.lock";

/// Exclusive hold on a store, shared by every process using it. Released
/// on drop.
pub struct StoreLock {
    file: Option<fs::File>,
}

impl StoreLock {
    /// A lock for stores no other process can reach.
    pub fn unshared() -> Self {
        Self { file: None }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                log::warn!("Failed to release store lock: {}", e);
            }
        }
    }
}

/// Durable string storage addressed by key.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`. `Ok(None)` when nothing was ever written.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Persist `value` under `key`. Must only return `Ok` once the value is durable.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Block until no other user of the same backing storage holds the lock.
    /// Read-modify-write sequences run under it.
    fn lock(&self) -> Result<StoreLock, StorageError> {
        Ok(StoreLock::unshared())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn lock(&self) -> Result<StoreLock, StorageError> {
        (**self).lock()
    }
}

/// File-per-key store rooted at a directory.
///
/// Several processes may share one directory (capture and the sync daemon
/// run separately); `lock` serializes them through a lock file.
pub struct FileStore {
    dir: PathBuf,
    quota: Option<usize>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            quota: Some(DEFAULT_QUOTA_BYTES),
        }
    }

    /// Override the per-value byte budget. `None` disables the check.
    pub fn with_quota(mut self, quota: Option<usize>) -> Self {
        self.quota = quota;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn io_err(key: &str, source: std::io::Error) -> StorageError {
        StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(quota) = self.quota {
            if value.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    size: value.len(),
                    quota,
                });
            }
        }

        fs::create_dir_all(&self.dir).map_err(|e| Self::io_err(key, e))?;

        // Uniquely named temp file, then rename: readers never see a torn
        // file and concurrent writers never share a temp file.
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| Self::io_err(key, e))?;
        tmp.write_all(value.as_bytes())
            .map_err(|e| Self::io_err(key, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Self::io_err(key, e))?;
        tmp.persist(self.path_for(key))
            .map_err(|e| Self::io_err(key, e.error))?;
        Ok(())
    }

    fn lock(&self) -> Result<StoreLock, StorageError> {
        fs::create_dir_all(&self.dir).map_err(|e| Self::io_err(LOCK_FILE, e))?;
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))
            .map_err(|e| Self::io_err(LOCK_FILE, e))?;
        file.lock_exclusive()
            .map_err(|e| Self::io_err(LOCK_FILE, e))?;
        Ok(StoreLock { file: Some(file) })
    }
}

/// In-memory store with failure injection, used by tests.
#[cfg(test)]
pub struct MemoryStore {
    values: std::sync::Mutex<std::collections::HashMap<String, String>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self {
            values: std::sync::Mutex::new(std::collections::HashMap::new()),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Make every subsequent `set` fail as if storage were full.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Seed a raw value, bypassing failure injection.
    pub fn put_raw(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

#[cfg(test)]
impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                size: value.len(),
                quota: 0,
            });
        }
        self.put_raw(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.get("nothing").unwrap().is_none());
    }

    #[test]
    fn test_file_store_set_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.set("queue", "[1,2,3]").unwrap();
        assert_eq!(store.get("queue").unwrap().as_deref(), Some("[1,2,3]"));

        store.set("queue", "[]").unwrap();
        assert_eq!(store.get("queue").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_file_store_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::new(&nested);
        store.set("queue", "[]").unwrap();
        assert!(nested.join("queue.json").exists());
        // No leftover temp file after the rename
        let names: Vec<_> = fs::read_dir(&nested)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("queue.json")]);
    }

    #[test]
    fn test_file_store_quota_rejects_large_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).with_quota(Some(8));
        store.set("queue", "[]").unwrap();

        let err = store.set("queue", "[1,2,3,4,5,6]").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { size: 13, quota: 8, .. }));
        // Previous value is untouched
        assert_eq!(store.get("queue").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::new(dir.path()).set("queue", "[\"x\"]").unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.get("queue").unwrap().as_deref(), Some("[\"x\"]"));
    }

    #[test]
    fn test_memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        store.fail_writes(true);
        assert!(store.set("k", "w").is_err());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_file_store_concurrent_writers_never_tear() {
        let dir = tempfile::tempdir().unwrap();
        let writers: Vec<_> = (0..4)
            .map(|n| {
                let store = FileStore::new(dir.path());
                std::thread::spawn(move || {
                    let value = format!("[{}]", n.to_string().repeat(2000));
                    for _ in 0..50 {
                        store.set("queue", &value).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let text = FileStore::new(dir.path()).get("queue").unwrap().unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_file_store_lock_excludes_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let held = FileStore::new(dir.path()).lock().unwrap();

        let acquired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let other = FileStore::new(dir.path());
        let flag = acquired.clone();
        let waiter = std::thread::spawn(move || {
            let _lock = other.lock().unwrap();
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(!acquired.load(std::sync::atomic::Ordering::SeqCst));

        drop(held);
        waiter.join().unwrap();
        assert!(acquired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
