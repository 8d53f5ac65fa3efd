//! Physical key-value storage
//!
//! The lowest layer: a flat namespace of keys holding strings, numbers or
//! booleans. Everything above (keyed accessors, the tracker provider) is
//! written against the [`StorageBackend`] trait, so the same code runs over
//! the in-memory fake in tests and the file-backed store in the binary.
mod file;
mod in_memory;

pub use self::{file::*, in_memory::*};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub type Key = String;
pub type KeyRef<'a> = &'a str;

/// A raw value as held by a backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl StoredValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StoredValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for StoredValue {
    fn from(s: String) -> Self {
        StoredValue::String(s)
    }
}

impl From<&str> for StoredValue {
    fn from(s: &str) -> Self {
        StoredValue::String(s.to_owned())
    }
}

impl From<bool> for StoredValue {
    fn from(b: bool) -> Self {
        StoredValue::Bool(b)
    }
}

impl From<i64> for StoredValue {
    fn from(n: i64) -> Self {
        StoredValue::Number(n.into())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage file is corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// A persistent key-value store
///
/// Implementations must be thread-safe; every call is expected to be
/// durable by the time it returns.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: KeyRef) -> Result<Option<StoredValue>, StorageError>;
    fn set(&self, key: KeyRef, value: StoredValue) -> Result<(), StorageError>;
    fn delete(&self, key: KeyRef) -> Result<(), StorageError>;

    fn contains(&self, key: KeyRef) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }
}

pub type SharedStorage = Arc<dyn StorageBackend + 'static>;
