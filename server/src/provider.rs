//! Pluggable key/value persistence behind the time store.
//!
//! The store never assumes a particular on-disk format; it only requires
//! these semantics: a successful write is durable before the call returns,
//! and `overwrite = false` refuses to replace an existing key.

use log::{debug, info};
use shared::PlayerId;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Persistence failure taxonomy. Every variant is recoverable at the node
/// level; callers log and either retry (accumulator) or drop (forwarded
/// writes).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage is closed")]
    Closed,

    #[error("key {0} already exists and overwrite was not requested")]
    DuplicateKey(PlayerId),

    #[error("corrupt data file: {0}")]
    Corrupt(String),

    #[error("batch merge failed for {} key(s)", failed.len())]
    Batch { failed: Vec<PlayerId> },
}

/// Key/value persistence consumed by the time store.
///
/// `read` distinguishes absent from zero; `read_many` omits absent keys
/// from its result map.
pub trait PersistenceProvider: Send + Sync {
    fn read(&self, key: PlayerId) -> Result<Option<u64>, StorageError>;

    fn read_many(&self, keys: &[PlayerId]) -> Result<HashMap<PlayerId, u64>, StorageError>;

    fn read_all(&self) -> Result<HashMap<PlayerId, u64>, StorageError>;

    fn write(&self, key: PlayerId, value: u64, overwrite: bool) -> Result<(), StorageError>;

    fn write_all(
        &self,
        entries: &HashMap<PlayerId, u64>,
        overwrite: bool,
    ) -> Result<(), StorageError>;

    fn close(&self) -> Result<(), StorageError>;
}

/// File-backed provider: the full map lives in memory and every mutation
/// rewrites a bincode snapshot through a temp file rename, fsynced before
/// the write call returns.
pub struct FileProvider {
    path: PathBuf,
    entries: Mutex<HashMap<PlayerId, u64>>,
}

impl FileProvider {
    /// Opens the data file, creating an empty map when it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = if path.exists() {
            let bytes = fs::read(&path)?;
            let map: HashMap<PlayerId, u64> =
                bincode::deserialize(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))?;
            info!("Loaded {} time records from {}", map.len(), path.display());
            map
        } else {
            info!("No data file at {}, starting empty", path.display());
            HashMap::new()
        };

        Ok(FileProvider {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &HashMap<PlayerId, u64>) -> Result<(), StorageError> {
        let bytes =
            bincode::serialize(entries).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<PlayerId, u64>> {
        // Writers only fail between memory update and persist, which leaves
        // the map internally consistent, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PersistenceProvider for FileProvider {
    fn read(&self, key: PlayerId) -> Result<Option<u64>, StorageError> {
        Ok(self.lock_entries().get(&key).copied())
    }

    fn read_many(&self, keys: &[PlayerId]) -> Result<HashMap<PlayerId, u64>, StorageError> {
        let entries = self.lock_entries();
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(key).map(|value| (*key, *value)))
            .collect())
    }

    fn read_all(&self) -> Result<HashMap<PlayerId, u64>, StorageError> {
        Ok(self.lock_entries().clone())
    }

    fn write(&self, key: PlayerId, value: u64, overwrite: bool) -> Result<(), StorageError> {
        let mut entries = self.lock_entries();
        if !overwrite && entries.contains_key(&key) {
            return Err(StorageError::DuplicateKey(key));
        }
        entries.insert(key, value);
        self.persist(&entries)
    }

    fn write_all(
        &self,
        batch: &HashMap<PlayerId, u64>,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        let mut entries = self.lock_entries();
        if !overwrite {
            if let Some(key) = batch.keys().find(|key| entries.contains_key(key)) {
                return Err(StorageError::DuplicateKey(*key));
            }
        }
        for (key, value) in batch {
            entries.insert(*key, *value);
        }
        self.persist(&entries)
    }

    fn close(&self) -> Result<(), StorageError> {
        let entries = self.lock_entries();
        self.persist(&entries)?;
        debug!(
            "File provider closed with {} records at {}",
            entries.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// In-memory provider for tests and ephemeral runs. Writes can be forced to
/// fail to exercise storage-error paths.
#[derive(Default)]
pub struct MemoryProvider {
    entries: Mutex<HashMap<PlayerId, u64>>,
    fail_writes: AtomicBool,
}

impl MemoryProvider {
    pub fn new() -> Self {
        MemoryProvider::default()
    }

    /// When set, every subsequent write fails with an injected I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        Ok(())
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<PlayerId, u64>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PersistenceProvider for MemoryProvider {
    fn read(&self, key: PlayerId) -> Result<Option<u64>, StorageError> {
        Ok(self.lock_entries().get(&key).copied())
    }

    fn read_many(&self, keys: &[PlayerId]) -> Result<HashMap<PlayerId, u64>, StorageError> {
        let entries = self.lock_entries();
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(key).map(|value| (*key, *value)))
            .collect())
    }

    fn read_all(&self) -> Result<HashMap<PlayerId, u64>, StorageError> {
        Ok(self.lock_entries().clone())
    }

    fn write(&self, key: PlayerId, value: u64, overwrite: bool) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut entries = self.lock_entries();
        if !overwrite && entries.contains_key(&key) {
            return Err(StorageError::DuplicateKey(key));
        }
        entries.insert(key, value);
        Ok(())
    }

    fn write_all(
        &self,
        batch: &HashMap<PlayerId, u64>,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        self.check_writable()?;
        let mut entries = self.lock_entries();
        if !overwrite {
            if let Some(key) = batch.keys().find(|key| entries.contains_key(key)) {
                return Err(StorageError::DuplicateKey(*key));
            }
        }
        for (key, value) in batch {
            entries.insert(*key, *value);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "playtime-provider-{}-{}-{}.dat",
            tag,
            std::process::id(),
            rand::random::<u32>()
        ));
        path
    }

    #[test]
    fn test_file_provider_persists_across_reopen() {
        let path = temp_path("reopen");
        let key = PlayerId::new(1);

        {
            let provider = FileProvider::open(&path).unwrap();
            provider.write(key, 500, true).unwrap();
            provider.close().unwrap();
        }

        let provider = FileProvider::open(&path).unwrap();
        assert_eq!(provider.read(key).unwrap(), Some(500));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_file_provider_duplicate_key_refused() {
        let path = temp_path("dup");
        let key = PlayerId::new(2);

        let provider = FileProvider::open(&path).unwrap();
        provider.write(key, 1, false).unwrap();
        assert!(matches!(
            provider.write(key, 2, false),
            Err(StorageError::DuplicateKey(_))
        ));
        // Overwrite allowed when requested
        provider.write(key, 2, true).unwrap();
        assert_eq!(provider.read(key).unwrap(), Some(2));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_memory_provider_read_many_skips_absent() {
        let provider = MemoryProvider::new();
        let present = PlayerId::new(1);
        let absent = PlayerId::new(2);
        provider.write(present, 10, true).unwrap();

        let result = provider.read_many(&[present, absent]).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(&present), Some(&10));
    }

    #[test]
    fn test_memory_provider_injected_failure() {
        let provider = MemoryProvider::new();
        provider.set_fail_writes(true);
        assert!(matches!(
            provider.write(PlayerId::new(1), 1, true),
            Err(StorageError::Io(_))
        ));

        provider.set_fail_writes(false);
        provider.write(PlayerId::new(1), 1, true).unwrap();
    }

    #[test]
    fn test_absent_is_not_zero() {
        let provider = MemoryProvider::new();
        assert_eq!(provider.read(PlayerId::new(9)).unwrap(), None);
    }
}
