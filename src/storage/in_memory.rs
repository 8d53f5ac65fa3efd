use super::*;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Fake in-memory storage.
///
/// Useful for unit-tests. Cloning shares the underlying map, which is how
/// tests simulate a process restart: drop the provider, keep the storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Mutex<BTreeMap<Key, StoredValue>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> SharedStorage {
        Arc::new(Self::new())
    }

    pub fn keys(&self) -> Vec<Key> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl StorageBackend for InMemoryStorage {
    fn get(&self, key: KeyRef) -> Result<Option<StoredValue>, StorageError> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn set(&self, key: KeyRef, value: StoredValue) -> Result<(), StorageError> {
        self.inner.lock().insert(key.to_owned(), value);
        Ok(())
    }

    fn delete(&self, key: KeyRef) -> Result<(), StorageError> {
        self.inner.lock().remove(key);
        Ok(())
    }
}
