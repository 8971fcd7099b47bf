// common/src/storage.rs
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use thiserror::Error;

const LOG_CATEGORY: &str = "Storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("stored value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cipher failure: {0}")]
    Cipher(String),
}

/// String key-value storage shared by every tab of the same origin.
///
/// Not transactional: concurrent writers race and the last write wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-wide store; clones share the same entries.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// External encryption utility. Implementations are opaque to this crate.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plain: &str) -> Result<String, StorageError>;
    fn decrypt(&self, sealed: &str) -> Result<String, StorageError>;
}

/// Stores values as plain JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCipher;

impl Cipher for PassthroughCipher {
    fn encrypt(&self, plain: &str) -> Result<String, StorageError> {
        Ok(plain.to_string())
    }

    fn decrypt(&self, sealed: &str) -> Result<String, StorageError> {
        Ok(sealed.to_string())
    }
}

/// JSON + cipher layer over a key-value store, namespaced by a key prefix.
#[derive(Clone)]
pub struct SecureStore {
    store: Arc<dyn KeyValueStore>,
    cipher: Arc<dyn Cipher>,
    prefix: String,
}

impl SecureStore {
    pub fn new(store: Arc<dyn KeyValueStore>, cipher: Arc<dyn Cipher>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            cipher,
            prefix: prefix.into(),
        }
    }

    /// Plain JSON over `store` with no key prefix
    pub fn plain(store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(store, Arc::new(PassthroughCipher), "")
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let json = serde_json::to_string(value)?;
        let sealed = self.cipher.encrypt(&json)?;
        self.store.set(&self.full_key(key), sealed)
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(sealed) = self.store.get(&self.full_key(key))? else {
            return Ok(None);
        };
        let json = self.cipher.decrypt(&sealed)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Load treating any failure as "no data"
    pub fn load_or_none<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.load(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(category = LOG_CATEGORY, key, error = %e, "Stored value unavailable");
                None
            }
        }
    }

    pub fn clear(&self, key: &str) -> Result<(), StorageError> {
        self.store.remove(&self.full_key(key))
    }
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
