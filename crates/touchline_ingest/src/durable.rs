//! redb-backed state store.
//!
//! One table maps record key to the JSON-encoded field map. Each upsert
//! reads, merges and writes the record inside a single write transaction.

use crate::store::{FieldMap, StateStore, StoreError};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LATEST_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("latest_state");

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend {
        reason: err.to_string(),
    }
}

/// Durable store persisted to a single redb file
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").field("path", &self.path).finish()
    }
}

impl RedbStore {
    /// Open or create the store at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the database file cannot be opened or initialized
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(backend)?;

        // Table exists from here on, so readers never see it missing.
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(LATEST_STATE).map_err(backend)?;
        txn.commit().map_err(backend)?;

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    /// Path of the database file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn upsert_blocking(db: &Database, key: &str, fields: FieldMap) -> Result<(), StoreError> {
        let txn = db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(LATEST_STATE).map_err(backend)?;
            let mut record: FieldMap = match table.get(key).map_err(backend)? {
                Some(existing) => serde_json::from_slice(existing.value())?,
                None => FieldMap::new(),
            };
            record.extend(fields);

            let encoded = serde_json::to_vec(&record)?;
            table.insert(key, encoded.as_slice()).map_err(backend)?;
        }
        txn.commit().map_err(backend)
    }

    fn read_blocking(db: &Database, key: &str) -> Result<Option<FieldMap>, StoreError> {
        let txn = db.begin_read().map_err(backend)?;
        let table = txn.open_table(LATEST_STATE).map_err(backend)?;
        match table.get(key).map_err(backend)? {
            Some(existing) => Ok(Some(serde_json::from_slice(existing.value())?)),
            None => Ok(None),
        }
    }
}

fn joined<T>(result: Result<Result<T, StoreError>, tokio::task::JoinError>) -> Result<T, StoreError> {
    result.map_err(|e| StoreError::Task {
        reason: e.to_string(),
    })?
}

#[async_trait]
impl StateStore for RedbStore {
    async fn upsert_fields(&self, key: &str, fields: FieldMap) -> Result<(), StoreError> {
        let db = self.db.clone();
        let key = key.to_string();
        joined(tokio::task::spawn_blocking(move || Self::upsert_blocking(&db, &key, fields)).await)
    }

    async fn fields(&self, key: &str) -> Result<Option<FieldMap>, StoreError> {
        let db = self.db.clone();
        let key = key.to_string();
        joined(tokio::task::spawn_blocking(move || Self::read_blocking(&db, &key)).await)
    }
}
