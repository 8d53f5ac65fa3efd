//! Typed accessors over a [`StorageBackend`]
//!
//! [`KeyedStore`] binds one logical key to a value type. Strings, numbers
//! and booleans go to the backend as themselves; anything else is written
//! as a JSON document. Reads never fail loudly: a missing key, a backend
//! error or an undecodable value all come back as `None` (with a log line
//! for the last two), so a corrupted local store can't take callers down.
//!
//! [`KeyedCollection`] is the dynamic variant: many values under a shared
//! prefix, with a side index of the stored suffixes so the whole collection
//! can be listed or wiped without a backend scan.
use crate::storage::{Key, KeyRef, SharedStorage, StorageError, StoredValue};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    marker::PhantomData,
};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum KeyedStoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("value encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("invalid collection key suffix: {0:?}")]
    InvalidSuffix(String),
}

/// The shape a value had when it was last written through an accessor
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ValueKind {
    Json,
    String,
    Number,
    Bool,
}

fn encode<T: Serialize>(value: &T) -> Result<(StoredValue, ValueKind), serde_json::Error> {
    Ok(match serde_json::to_value(value)? {
        Value::String(s) => (StoredValue::String(s), ValueKind::String),
        Value::Number(n) => (StoredValue::Number(n), ValueKind::Number),
        Value::Bool(b) => (StoredValue::Bool(b), ValueKind::Bool),
        other => (StoredValue::String(serde_json::to_string(&other)?), ValueKind::Json),
    })
}

fn decode<T: DeserializeOwned>(
    raw: StoredValue,
    kind: Option<ValueKind>,
) -> Result<T, serde_json::Error> {
    match raw {
        StoredValue::String(s) if kind == Some(ValueKind::String) => {
            serde_json::from_value(Value::String(s))
        }
        // Without a tag, try the JSON form first and fall back to the raw string.
        StoredValue::String(s) => match serde_json::from_str(&s) {
            Ok(v) => Ok(v),
            Err(_) => serde_json::from_value(Value::String(s)),
        },
        StoredValue::Number(n) => serde_json::from_value(Value::Number(n)),
        StoredValue::Bool(b) => serde_json::from_value(Value::Bool(b)),
    }
}

/// Accessor for a single key holding a `T`
pub struct KeyedStore<T> {
    storage: SharedStorage,
    key: Key,
    kind: Mutex<Option<ValueKind>>,
    _value: PhantomData<fn() -> T>,
}

impl<T> KeyedStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(storage: SharedStorage, key: impl Into<Key>) -> Self {
        Self {
            storage,
            key: key.into(),
            kind: Mutex::new(None),
            _value: PhantomData,
        }
    }

    pub fn key(&self) -> KeyRef {
        &self.key
    }

    pub fn try_store(&self, value: &T) -> Result<(), KeyedStoreError> {
        let (raw, kind) = encode(value)?;
        self.storage.set(&self.key, raw)?;
        *self.kind.lock() = Some(kind);
        Ok(())
    }

    /// Best-effort write; failures are logged
    pub fn store(&self, value: &T) {
        if let Err(e) = self.try_store(value) {
            warn!(key = %self.key, error = %e, "failed to store value");
        }
    }

    pub fn try_retrieve(&self) -> Result<Option<T>, KeyedStoreError> {
        let Some(raw) = self.storage.get(&self.key)? else {
            return Ok(None);
        };
        let kind = *self.kind.lock();
        Ok(Some(decode(raw, kind)?))
    }

    pub fn retrieve(&self) -> Option<T> {
        match self.try_retrieve() {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %self.key, error = %e, "failed to retrieve value");
                None
            }
        }
    }

    /// Delete the key, returning what it held
    pub fn remove(&self) -> Option<T> {
        let previous = self.retrieve();
        if let Err(e) = self.storage.delete(&self.key) {
            warn!(key = %self.key, error = %e, "failed to remove value");
        }
        *self.kind.lock() = None;
        previous
    }
}

/// Accessor for a family of keys sharing `prefix`
///
/// Items live at `"{prefix}-{suffix}"`. The index of suffixes is a JSON
/// array stored at `prefix` itself, so suffixes may contain any character.
pub struct KeyedCollection<T> {
    storage: SharedStorage,
    prefix: Key,
    // also serializes index read-modify-write cycles
    kinds: Mutex<BTreeMap<String, ValueKind>>,
    _value: PhantomData<fn() -> T>,
}

impl<T> KeyedCollection<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(storage: SharedStorage, prefix: impl Into<Key>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
            kinds: Mutex::new(BTreeMap::new()),
            _value: PhantomData,
        }
    }

    pub fn prefix(&self) -> KeyRef {
        &self.prefix
    }

    fn item_key(&self, suffix: &str) -> Key {
        format!("{}-{}", self.prefix, suffix)
    }

    fn load_index(&self) -> Result<BTreeSet<String>, KeyedStoreError> {
        match self.storage.get(&self.prefix)? {
            None => Ok(BTreeSet::new()),
            Some(raw) => Ok(decode(raw, Some(ValueKind::Json))?),
        }
    }

    fn save_index(&self, index: &BTreeSet<String>) -> Result<(), KeyedStoreError> {
        if index.is_empty() {
            self.storage.delete(&self.prefix)?;
        } else {
            self.storage
                .set(&self.prefix, StoredValue::String(serde_json::to_string(index)?))?;
        }
        Ok(())
    }

    pub fn try_store(&self, suffix: &str, value: &T) -> Result<(), KeyedStoreError> {
        if suffix.is_empty() {
            return Err(KeyedStoreError::InvalidSuffix(suffix.to_owned()));
        }
        let (raw, kind) = encode(value)?;

        let mut kinds = self.kinds.lock();
        self.storage.set(&self.item_key(suffix), raw)?;
        kinds.insert(suffix.to_owned(), kind);

        let mut index = self.load_index()?;
        if index.insert(suffix.to_owned()) {
            self.save_index(&index)?;
        }
        Ok(())
    }

    pub fn store(&self, suffix: &str, value: &T) {
        if let Err(e) = self.try_store(suffix, value) {
            warn!(prefix = %self.prefix, suffix, error = %e, "failed to store value");
        }
    }

    fn retrieve_inner(&self, suffix: &str, kind: Option<ValueKind>) -> Option<T> {
        let key = self.item_key(suffix);
        let res = self
            .storage
            .get(&key)
            .map_err(KeyedStoreError::from)
            .and_then(|raw| Ok(raw.map(|raw| decode(raw, kind)).transpose()?));
        match res {
            Ok(v) => v,
            Err(e) => {
                warn!(%key, error = %e, "failed to retrieve value");
                None
            }
        }
    }

    pub fn retrieve(&self, suffix: &str) -> Option<T> {
        let kind = self.kinds.lock().get(suffix).copied();
        self.retrieve_inner(suffix, kind)
    }

    pub fn remove(&self, suffix: &str) -> Option<T> {
        let mut kinds = self.kinds.lock();
        let previous = self.retrieve_inner(suffix, kinds.get(suffix).copied());

        let key = self.item_key(suffix);
        if let Err(e) = self.storage.delete(&key) {
            warn!(%key, error = %e, "failed to remove value");
        }
        kinds.remove(suffix);

        let res = self.load_index().and_then(|mut index| {
            if index.remove(suffix) {
                self.save_index(&index)?;
            }
            Ok(())
        });
        if let Err(e) = res {
            warn!(prefix = %self.prefix, error = %e, "failed to update collection index");
        }
        previous
    }

    /// Every suffix currently stored, in sorted order
    pub fn suffixes(&self) -> Vec<String> {
        match self.load_index() {
            Ok(index) => index.into_iter().collect(),
            Err(e) => {
                warn!(prefix = %self.prefix, error = %e, "failed to read collection index");
                vec![]
            }
        }
    }

    pub fn retrieve_all(&self) -> BTreeMap<String, T> {
        self.suffixes()
            .into_iter()
            .filter_map(|suffix| self.retrieve(&suffix).map(|v| (suffix, v)))
            .collect()
    }

    /// Remove every item and the index, returning the removed values
    pub fn remove_all(&self) -> BTreeMap<String, T> {
        let removed = self
            .suffixes()
            .into_iter()
            .filter_map(|suffix| self.remove(&suffix).map(|v| (suffix, v)))
            .collect();

        if let Err(e) = self.storage.delete(&self.prefix) {
            warn!(prefix = %self.prefix, error = %e, "failed to remove collection index");
        }
        removed
    }
}
