//! The cache store contract shared by both backends.

use async_trait::async_trait;
use receptionist_core::{CallbackEntry, RequestEntry};

use crate::error::StorageError;

/// Which persistence family a store belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Table-backed store: queryable, duplicate rows on repeated writes.
    Relational,
    /// Bucket-backed store: exact key lookup, last write wins.
    KeyValue,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::KeyValue => "key-value",
        }
    }
}

/// Key under which a callback entry is stored in a key-value bucket.
#[must_use]
pub fn callback_key(event: &str, url: &str) -> String {
    format!("{event}:{url}")
}

/// Pluggable persistence backend for request and callback entries.
///
/// Exactly one store is bound to a gateway. Requests and callbacks live in
/// separate tables/buckets of the same backend and are never mixed.
///
/// Writes always insert: the relational store keeps duplicates for the
/// same URL while the key-value store overwrites. Used as
/// `Arc<dyn CacheStore>`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Backend family of this store.
    fn kind(&self) -> BackendKind;

    /// One-time initialization (create tables or buckets). Idempotent.
    async fn initialize(&self) -> Result<(), StorageError>;

    /// Persist one request entry.
    async fn write(&self, entry: &RequestEntry) -> Result<(), StorageError>;

    /// Look up the entry cached for `url`, if any.
    async fn read(&self, url: &str) -> Result<Option<RequestEntry>, StorageError>;

    /// Persist one callback entry in the callback table/bucket.
    async fn write_callback(&self, entry: &CallbackEntry) -> Result<(), StorageError>;

    /// Look up a callback by event name and url.
    async fn read_callback(
        &self,
        event: &str,
        url: &str,
    ) -> Result<Option<CallbackEntry>, StorageError>;

    /// Release resources and close connections.
    async fn close(&self) -> Result<(), StorageError>;
}
