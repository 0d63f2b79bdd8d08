//! Error types for the gateway, its stores and its transport.

use receptionist_core::RouteFormatError;

/// Failures of the active cache store. Fatal to the current call; never
/// retried inside the store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("relational backend error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("key-value backend error: {0}")]
    KeyValue(#[from] redb::Error),
    #[error("failed to encode or decode a stored entry: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("stored row {id} is corrupt: {reason}")]
    CorruptRow { id: i64, reason: String },
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Converts any redb error family into [`StorageError::KeyValue`].
pub(crate) fn kv_error(err: impl Into<redb::Error>) -> StorageError {
    StorageError::KeyValue(err.into())
}

/// Failures of the outbound HTTP transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by [`Receptionist::request`](crate::gateway::Receptionist::request).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Route(#[from] RouteFormatError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
