//! Persistent merge-add time store.
//!
//! All durable playtime lives here, keyed by identity, with add-only merge
//! semantics: order and batching of additions never change the final
//! totals. Same-key read-modify-writes are serialized through a sharded
//! lock table so concurrent additions for different players do not contend
//! on a single lock.

use crate::provider::{PersistenceProvider, StorageError};
use log::warn;
use shared::PlayerId;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

const SHARD_COUNT: usize = 16;

/// Key(identity) → duration store with merge-add writes.
pub struct TimeStore {
    provider: Arc<dyn PersistenceProvider>,
    shards: Vec<Mutex<()>>,
    closed: AtomicBool,
}

impl TimeStore {
    pub fn new(provider: Arc<dyn PersistenceProvider>) -> Self {
        TimeStore {
            provider,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(())).collect(),
            closed: AtomicBool::new(false),
        }
    }

    fn shard(&self, key: PlayerId) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Single-key lookup. `None` means no record exists, which is distinct
    /// from a stored zero.
    pub fn get(&self, key: PlayerId) -> Result<Option<u64>, StorageError> {
        self.ensure_open()?;
        self.provider.read(key)
    }

    /// Adds `delta` seconds to the stored total for `key`.
    pub async fn add_time(&self, key: PlayerId, delta: u64) -> Result<(), StorageError> {
        self.ensure_open()?;
        let _guard = self.shard(key).lock().await;
        let current = self.provider.read(key)?.unwrap_or(0);
        self.provider.write(key, current.saturating_add(delta), true)
    }

    /// Merges every entry of `deltas` independently. Keys that fail are
    /// collected into [`StorageError::Batch`]; the rest are still merged,
    /// so one bad key never silently drops the others.
    pub async fn add_times(&self, deltas: &HashMap<PlayerId, u64>) -> Result<(), StorageError> {
        self.ensure_open()?;

        let mut failed = Vec::new();
        for (key, delta) in deltas {
            let _guard = self.shard(*key).lock().await;
            let merge = self
                .provider
                .read(*key)
                .and_then(|current| {
                    self.provider
                        .write(*key, current.unwrap_or(0).saturating_add(*delta), true)
                });
            if let Err(error) = merge {
                warn!("Batch merge failed for {}: {}", key, error);
                failed.push(*key);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StorageError::Batch { failed })
        }
    }

    /// Best-effort consistent snapshot of every stored total.
    pub fn all_entries(&self) -> Result<HashMap<PlayerId, u64>, StorageError> {
        self.ensure_open()?;
        self.provider.read_all()
    }

    /// Marks the store closed and releases the provider. Idempotent; every
    /// operation after the first close fails with [`StorageError::Closed`].
    pub fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.provider.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;

    fn store() -> (Arc<MemoryProvider>, TimeStore) {
        let provider = Arc::new(MemoryProvider::new());
        let store = TimeStore::new(Arc::clone(&provider) as Arc<dyn PersistenceProvider>);
        (provider, store)
    }

    #[tokio::test]
    async fn test_add_time_merges_onto_existing() {
        let (_, store) = store();
        let key = PlayerId::new(1);

        store.add_time(key, 500).await.unwrap();
        store.add_time(key, 250).await.unwrap();

        assert_eq!(store.get(key).unwrap(), Some(750));
    }

    #[tokio::test]
    async fn test_absent_key_reads_none() {
        let (_, store) = store();
        assert_eq!(store.get(PlayerId::new(42)).unwrap(), None);
    }

    #[tokio::test]
    async fn test_batch_order_does_not_matter() {
        let a = PlayerId::new(1);
        let b = PlayerId::new(2);

        let first: HashMap<_, _> = [(a, 10), (b, 5)].into_iter().collect();
        let second: HashMap<_, _> = [(a, 3)].into_iter().collect();

        let (_, forward) = store();
        forward.add_times(&first).await.unwrap();
        forward.add_times(&second).await.unwrap();

        let (_, backward) = store();
        backward.add_times(&second).await.unwrap();
        backward.add_times(&first).await.unwrap();

        assert_eq!(forward.all_entries().unwrap(), backward.all_entries().unwrap());
        assert_eq!(forward.get(a).unwrap(), Some(13));
        assert_eq!(forward.get(b).unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_batch_failure_reports_failed_keys() {
        let (provider, store) = store();
        provider.set_fail_writes(true);

        let deltas: HashMap<_, _> = [(PlayerId::new(1), 10), (PlayerId::new(2), 20)]
            .into_iter()
            .collect();

        match store.add_times(&deltas).await {
            Err(StorageError::Batch { failed }) => assert_eq!(failed.len(), 2),
            other => panic!("expected batch error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_concurrent_same_key_additions_do_not_lose_updates() {
        let (_, store) = store();
        let store = Arc::new(store);
        let key = PlayerId::new(7);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.add_time(key, 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get(key).unwrap(), Some(32));
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let (_, store) = store();
        store.close().unwrap();

        assert!(matches!(store.get(PlayerId::new(1)), Err(StorageError::Closed)));
        assert!(matches!(
            store.add_time(PlayerId::new(1), 1).await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(store.all_entries(), Err(StorageError::Closed)));
        // Second close is a no-op
        store.close().unwrap();
    }
}
