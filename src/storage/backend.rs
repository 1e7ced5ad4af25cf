//! Key/value back-ends the adapter can sit on

use super::StorageFault;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Raw key/value medium.
///
/// Back-ends report failures as plain `Err`s; the fault-reporting and
/// swallowing policy lives in [`super::StorageAdapter`].
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Read a value, `None` if the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>, StorageFault>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageFault>;

    /// Remove a key; removing an absent key succeeds
    async fn remove(&self, key: &str) -> Result<(), StorageFault>;

    async fn contains(&self, key: &str) -> Result<bool, StorageFault> {
        Ok(self.get(key).await?.is_some())
    }
}

#[async_trait]
impl<T: KeyValueBackend + ?Sized> KeyValueBackend for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageFault> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageFault> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageFault> {
        (**self).remove(key).await
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageFault> {
        (**self).contains(key).await
    }
}

/// In-process back-end. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry, bypassing any adapter checks
    pub fn with_entry(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.lock().insert(key.into(), value.into());
        self
    }

    /// Current raw value for a key
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageFault> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageFault> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageFault> {
        self.lock().remove(key);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, StorageFault> {
        Ok(self.lock().contains_key(key))
    }
}
