//! Key-value [`CacheStore`] backed by `redb`.
//!
//! Two buckets: `request_entries` keyed by URL and `callback_entries` keyed
//! by `event:url` (see [`callback_key`]). Values are JSON-encoded entries.
//! A write for an existing key replaces the previous value.
//!
//! redb is synchronous, so every operation runs on the blocking pool inside
//! its own read or write transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use receptionist_core::{CallbackEntry, RequestEntry};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{kv_error, StorageError};
use crate::storage::store::{callback_key, BackendKind, CacheStore};

type Bucket = TableDefinition<'static, &'static str, &'static [u8]>;

const REQUESTS: Bucket = TableDefinition::new("request_entries");
const CALLBACKS: Bucket = TableDefinition::new("callback_entries");

/// redb-backed key-value cache store.
#[derive(Clone)]
pub struct RedbCacheStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbCacheStore").finish_non_exhaustive()
    }
}

impl RedbCacheStore {
    /// Opens (or creates) the database file at `path` and its buckets.
    ///
    /// Blocks on file I/O; call from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::KeyValue`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(kv_error)?;
        create_buckets(&db)?;
        info!(path = %path.display(), "redb cache store ready");
        Ok(Self { db: Arc::new(db) })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::KeyValue`] if the database cannot be created.
    pub fn in_memory() -> Result<Self, StorageError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(kv_error)?;
        create_buckets(&db)?;
        debug!("in-memory redb cache store ready");
        Ok(Self { db: Arc::new(db) })
    }

    /// All request keys (URLs), in key order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the bucket cannot be read.
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(kv_error)?;
            let table = match txn.open_table(REQUESTS) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
                Err(err) => return Err(kv_error(err)),
            };
            let mut keys = Vec::new();
            for item in table.iter().map_err(kv_error)? {
                let (key, _) = item.map_err(kv_error)?;
                keys.push(key.value().to_owned());
            }
            Ok(keys)
        })
        .await?
    }

    /// Number of request entries stored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the bucket cannot be read.
    pub async fn len(&self) -> Result<u64, StorageError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(kv_error)?;
            match txn.open_table(REQUESTS) {
                Ok(table) => table.len().map_err(kv_error),
                Err(TableError::TableDoesNotExist(_)) => Ok(0),
                Err(err) => Err(kv_error(err)),
            }
        })
        .await?
    }

    /// Whether the request bucket is empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the bucket cannot be read.
    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }

    async fn put(&self, bucket: Bucket, key: String, value: Vec<u8>) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(kv_error)?;
            {
                let mut table = txn.open_table(bucket).map_err(kv_error)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(kv_error)?;
            }
            txn.commit().map_err(kv_error)
        })
        .await?
    }

    async fn get<T>(&self, bucket: Bucket, key: String) -> Result<Option<T>, StorageError>
    where
        T: DeserializeOwned,
    {
        let db = Arc::clone(&self.db);
        let raw = tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(kv_error)?;
            let table = match txn.open_table(bucket) {
                Ok(table) => table,
                Err(TableError::TableDoesNotExist(_)) => return Ok(None),
                Err(err) => return Err(kv_error(err)),
            };
            let value = table.get(key.as_str()).map_err(kv_error)?;
            Ok::<_, StorageError>(value.map(|guard| guard.value().to_vec()))
        })
        .await??;

        match raw {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn create_buckets(db: &Database) -> Result<(), StorageError> {
    let txn = db.begin_write().map_err(kv_error)?;
    txn.open_table(REQUESTS).map_err(kv_error)?;
    txn.open_table(CALLBACKS).map_err(kv_error)?;
    txn.commit().map_err(kv_error)
}

#[async_trait]
impl CacheStore for RedbCacheStore {
    fn kind(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || create_buckets(&db)).await?
    }

    async fn write(&self, entry: &RequestEntry) -> Result<(), StorageError> {
        let value = serde_json::to_vec(entry)?;
        self.put(REQUESTS, entry.url.clone(), value).await?;
        debug!(url = %entry.url, "stored request entry");
        Ok(())
    }

    async fn read(&self, url: &str) -> Result<Option<RequestEntry>, StorageError> {
        self.get(REQUESTS, url.to_owned()).await
    }

    async fn write_callback(&self, entry: &CallbackEntry) -> Result<(), StorageError> {
        let value = serde_json::to_vec(entry)?;
        let key = callback_key(&entry.event, &entry.entry.url);
        self.put(CALLBACKS, key, value).await?;
        debug!(event = %entry.event, "stored callback entry");
        Ok(())
    }

    async fn read_callback(
        &self,
        event: &str,
        url: &str,
    ) -> Result<Option<CallbackEntry>, StorageError> {
        self.get(CALLBACKS, callback_key(event, url)).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        // The database file is released when the last handle drops.
        info!("redb cache store closed");
        Ok(())
    }
}
