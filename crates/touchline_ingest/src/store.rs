//! Latest-state store contract and in-memory backend.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Scalar stored under a record field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Text value
    Text(String),
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Field name to value, in insertion order
pub type FieldMap = IndexMap<String, FieldValue>;

/// Store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend rejected the operation
    #[error("store backend error: {reason}")]
    Backend {
        /// Backend message
        reason: String,
    },
    /// Stored record could not be encoded or decoded
    #[error("serialization error: {reason}")]
    Serialization {
        /// Codec message
        reason: String,
    },
    /// Blocking store task did not complete
    #[error("store task failed: {reason}")]
    Task {
        /// Join failure
        reason: String,
    },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Keyed field-map storage.
///
/// `upsert_fields` merges into the existing record: named fields are
/// overwritten, others are left as they were.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Merge fields into the record at `key`, creating it if absent
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot persist the merge
    async fn upsert_fields(&self, key: &str, fields: FieldMap) -> Result<(), StoreError>;

    /// Read the record at `key`
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    async fn fields(&self, key: &str) -> Result<Option<FieldMap>, StoreError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, FieldMap>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether no record has been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend {
        reason: "lock poisoned".to_string(),
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn upsert_fields(&self, key: &str, fields: FieldMap) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.entry(key.to_string()).or_default().extend(fields);
        Ok(())
    }

    async fn fields(&self, key: &str) -> Result<Option<FieldMap>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(key).cloned())
    }
}
