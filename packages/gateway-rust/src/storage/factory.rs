//! Backend selection for the gateway's [`CacheStore`].
//!
//! [`open_store`] is the dependency injection point: it turns a
//! [`BackendConfig`] into an initialized `Arc<dyn CacheStore>` that the
//! gateway holds for its whole lifetime.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::error::StorageError;
use crate::storage::store::{BackendKind, CacheStore};
use crate::storage::stores::{RedbCacheStore, SqliteCacheStore};

/// Which backend to open, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Relational store at a SQLite connection URL.
    Sqlite { url: String },
    /// Key-value store in a redb file, or in memory when `path` is `None`.
    Redb { path: Option<PathBuf> },
}

impl BackendConfig {
    /// Private in-memory SQLite database.
    #[must_use]
    pub fn sqlite_in_memory() -> Self {
        Self::Sqlite {
            url: "sqlite::memory:".to_string(),
        }
    }

    /// Private in-memory redb database.
    #[must_use]
    pub fn redb_in_memory() -> Self {
        Self::Redb { path: None }
    }

    #[must_use]
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Sqlite { .. } => BackendKind::Relational,
            Self::Redb { .. } => BackendKind::KeyValue,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::sqlite_in_memory()
    }
}

/// Opens and initializes the store described by `config`.
///
/// # Errors
///
/// Returns [`StorageError`] if the backend cannot be opened or its
/// tables/buckets cannot be created.
pub async fn open_store(config: &BackendConfig) -> Result<Arc<dyn CacheStore>, StorageError> {
    let store: Arc<dyn CacheStore> = match config {
        BackendConfig::Sqlite { url } => Arc::new(SqliteCacheStore::connect(url).await?),
        BackendConfig::Redb { path: Some(path) } => {
            let path = path.clone();
            let store = tokio::task::spawn_blocking(move || RedbCacheStore::open(path)).await??;
            Arc::new(store)
        }
        BackendConfig::Redb { path: None } => Arc::new(RedbCacheStore::in_memory()?),
    };
    info!(backend = store.kind().as_str(), "cache store opened");
    Ok(store)
}
