//! Relational [`CacheStore`] backed by SQLite through `sqlx`.
//!
//! Requests and callbacks live in two tables whose columns mirror
//! [`RequestEntry`] and [`CallbackEntry`], with an auto-assigned `id`.
//! JSON-valued columns (`headers`, `body`, `response`) are stored as text.
//!
//! Every operation acquires its own pooled connection or transaction and
//! releases it before returning; nothing is held across calls.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use receptionist_core::{CallbackEntry, RequestEntry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage::store::{BackendKind, CacheStore};

/// Pool size for file-backed databases.
const MAX_CONNECTIONS: u32 = 5;

const REQUEST_COLUMNS: &str = "id, status, method, headers, url, body, response, timestamp";
const CALLBACK_COLUMNS: &str =
    "id, status, method, headers, url, body, response, timestamp, event, source";

const CREATE_REQUESTS: &str = r"
    CREATE TABLE IF NOT EXISTS request_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        status INTEGER NOT NULL,
        method TEXT NOT NULL,
        headers TEXT,
        url TEXT NOT NULL,
        body TEXT,
        response TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )
";
const CREATE_REQUESTS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_request_entries_url ON request_entries(url)";
const CREATE_CALLBACKS: &str = r"
    CREATE TABLE IF NOT EXISTS callback_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        status INTEGER NOT NULL,
        method TEXT NOT NULL,
        headers TEXT,
        url TEXT NOT NULL,
        body TEXT,
        response TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        event TEXT NOT NULL,
        source TEXT
    )
";
const CREATE_CALLBACKS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_callback_entries_event_url ON callback_entries(event, url)";

const INSERT_REQUEST: &str = r"
    INSERT INTO request_entries (status, method, headers, url, body, response, timestamp)
    VALUES (?, ?, ?, ?, ?, ?, ?)
";
const INSERT_CALLBACK: &str = r"
    INSERT INTO callback_entries
        (status, method, headers, url, body, response, timestamp, event, source)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
";

/// Equality filter over request or callback rows. `None` fields match all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub url: Option<String>,
    pub method: Option<String>,
    pub status: Option<u16>,
}

impl EntryFilter {
    /// Filter on `url` only, the cache lookup key.
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    fn push_conditions(&self, query: &mut QueryBuilder<'_, Sqlite>, first: &mut bool) {
        if let Some(url) = &self.url {
            push_condition(query, first, "url");
            query.push_bind(url.clone());
        }
        if let Some(method) = &self.method {
            push_condition(query, first, "method");
            query.push_bind(method.clone());
        }
        if let Some(status) = self.status {
            push_condition(query, first, "status");
            query.push_bind(i64::from(status));
        }
    }
}

fn push_condition(query: &mut QueryBuilder<'_, Sqlite>, first: &mut bool, column: &str) {
    query.push(if *first { " WHERE " } else { " AND " });
    query.push(column);
    query.push(" = ");
    *first = false;
}

/// A row read back from the relational store, with its backend-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow<T> {
    pub id: i64,
    pub entry: T,
}

/// SQLite-backed relational cache store.
///
/// A second write for the same URL inserts a second row; reads return the
/// first matching row in insertion order.
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Connects to `url` (e.g. `sqlite://cache.db` or `sqlite::memory:`),
    /// creating the database file and tables when missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Sql`] if the database cannot be opened.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = is_memory_url(url);
        let pool_options = if in_memory {
            // Each connection to an in-memory database sees its own copy,
            // so keep exactly one connection alive for the pool's lifetime.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(MAX_CONNECTIONS)
        };
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.initialize().await?;
        info!(url, in_memory, "sqlite cache store ready");
        Ok(store)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Sql`] if SQLite cannot be initialized.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:").await
    }

    /// Wraps an existing pool. Call [`CacheStore::initialize`] before use.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- Requests ---

    /// Inserts one request entry, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the insert or commit fails.
    pub async fn insert(&self, entry: &RequestEntry) -> Result<i64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let id = insert_request(&mut tx, entry).await?;
        tx.commit().await?;
        debug!(id, url = %entry.url, "inserted request entry");
        Ok(id)
    }

    /// Inserts several request entries in one transaction.
    ///
    /// Either every entry is stored or none is.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if any insert or the commit fails.
    pub async fn insert_batch(&self, entries: &[RequestEntry]) -> Result<Vec<i64>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            ids.push(insert_request(&mut tx, entry).await?);
        }
        tx.commit().await?;
        debug!(count = ids.len(), "inserted request batch");
        Ok(ids)
    }

    /// Fetches a request row by primary key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on query failure or an undecodable row.
    pub async fn find_by_id(
        &self,
        id: i64,
    ) -> Result<Option<StoredRow<RequestEntry>>, StorageError> {
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM request_entries WHERE id = ?");
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
        row.as_ref().map(decode_request).transpose()
    }

    /// Returns the first request row matching `filter`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on query failure or an undecodable row.
    pub async fn find_first(
        &self,
        filter: &EntryFilter,
    ) -> Result<Option<StoredRow<RequestEntry>>, StorageError> {
        Ok(self.find_all(filter, Some(1)).await?.into_iter().next())
    }

    /// Returns request rows matching `filter` in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on query failure or an undecodable row.
    pub async fn find_all(
        &self,
        filter: &EntryFilter,
        limit: Option<i64>,
    ) -> Result<Vec<StoredRow<RequestEntry>>, StorageError> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {REQUEST_COLUMNS} FROM request_entries"));
        let mut first = true;
        filter.push_conditions(&mut query, &mut first);
        query.push(" ORDER BY id");
        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(limit);
        }

        let mut conn = self.pool.acquire().await?;
        let rows = query.build().fetch_all(&mut *conn).await?;
        rows.iter().map(decode_request).collect()
    }

    /// Number of stored request rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Sql`] on query failure.
    pub async fn count(&self) -> Result<i64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM request_entries")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    // --- Callbacks ---

    /// Inserts one callback entry, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the insert or commit fails.
    pub async fn insert_callback(&self, entry: &CallbackEntry) -> Result<i64, StorageError> {
        let mut tx = self.pool.begin().await?;
        let request = &entry.entry;
        let id = sqlx::query(INSERT_CALLBACK)
            .bind(i64::from(request.status))
            .bind(request.method.as_str())
            .bind(encode_optional(request.headers.as_ref())?)
            .bind(request.url.as_str())
            .bind(encode_optional(request.body.as_ref())?)
            .bind(serde_json::to_string(&request.response)?)
            .bind(request.timestamp)
            .bind(entry.event.as_str())
            .bind(entry.source.as_deref())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
        tx.commit().await?;
        debug!(id, event = %entry.event, "inserted callback entry");
        Ok(id)
    }

    /// Returns callback rows for `event` (all events when `None`) matching
    /// `filter`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on query failure or an undecodable row.
    pub async fn find_callbacks(
        &self,
        event: Option<&str>,
        filter: &EntryFilter,
        limit: Option<i64>,
    ) -> Result<Vec<StoredRow<CallbackEntry>>, StorageError> {
        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {CALLBACK_COLUMNS} FROM callback_entries"));
        let mut first = true;
        if let Some(event) = event {
            push_condition(&mut query, &mut first, "event");
            query.push_bind(event.to_owned());
        }
        filter.push_conditions(&mut query, &mut first);
        query.push(" ORDER BY id");
        if let Some(limit) = limit {
            query.push(" LIMIT ").push_bind(limit);
        }

        let mut conn = self.pool.acquire().await?;
        let rows = query.build().fetch_all(&mut *conn).await?;
        rows.iter().map(decode_callback).collect()
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for statement in [
            CREATE_REQUESTS,
            CREATE_REQUESTS_INDEX,
            CREATE_CALLBACKS,
            CREATE_CALLBACKS_INDEX,
        ] {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn write(&self, entry: &RequestEntry) -> Result<(), StorageError> {
        self.insert(entry).await.map(|_| ())
    }

    async fn read(&self, url: &str) -> Result<Option<RequestEntry>, StorageError> {
        let row = self.find_first(&EntryFilter::url(url)).await?;
        Ok(row.map(|row| row.entry))
    }

    async fn write_callback(&self, entry: &CallbackEntry) -> Result<(), StorageError> {
        self.insert_callback(entry).await.map(|_| ())
    }

    async fn read_callback(
        &self,
        event: &str,
        url: &str,
    ) -> Result<Option<CallbackEntry>, StorageError> {
        let rows = self
            .find_callbacks(Some(event), &EntryFilter::url(url), Some(1))
            .await?;
        Ok(rows.into_iter().next().map(|row| row.entry))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        info!("sqlite cache store closed");
        Ok(())
    }
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

async fn insert_request(
    conn: &mut SqliteConnection,
    entry: &RequestEntry,
) -> Result<i64, StorageError> {
    let result = sqlx::query(INSERT_REQUEST)
        .bind(i64::from(entry.status))
        .bind(entry.method.as_str())
        .bind(encode_optional(entry.headers.as_ref())?)
        .bind(entry.url.as_str())
        .bind(encode_optional(entry.body.as_ref())?)
        .bind(serde_json::to_string(&entry.response)?)
        .bind(entry.timestamp)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

fn encode_optional<T: Serialize>(value: Option<&T>) -> Result<Option<String>, serde_json::Error> {
    value.map(serde_json::to_string).transpose()
}

fn decode_optional<T: DeserializeOwned>(raw: Option<&str>) -> Result<Option<T>, serde_json::Error> {
    raw.map(serde_json::from_str::<T>).transpose()
}

fn decode_request(row: &SqliteRow) -> Result<StoredRow<RequestEntry>, StorageError> {
    let id: i64 = row.try_get("id")?;
    let status: i64 = row.try_get("status")?;
    let status = u16::try_from(status).map_err(|_| StorageError::CorruptRow {
        id,
        reason: format!("status {status} out of range"),
    })?;
    let headers: Option<String> = row.try_get("headers")?;
    let body: Option<String> = row.try_get("body")?;
    let response: String = row.try_get("response")?;
    let timestamp: DateTime<Utc> = row.try_get("timestamp")?;

    let entry = RequestEntry {
        status,
        method: row.try_get("method")?,
        headers: decode_optional(headers.as_deref())?,
        url: row.try_get("url")?,
        body: decode_optional(body.as_deref())?,
        response: serde_json::from_str(&response)?,
        timestamp,
    };
    Ok(StoredRow { id, entry })
}

fn decode_callback(row: &SqliteRow) -> Result<StoredRow<CallbackEntry>, StorageError> {
    let StoredRow { id, entry } = decode_request(row)?;
    Ok(StoredRow {
        id,
        entry: CallbackEntry {
            entry,
            event: row.try_get("event")?,
            source: row.try_get("source")?,
        },
    })
}
