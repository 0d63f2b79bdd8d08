//! Cache storage for the gateway.
//!
//! Provides the [`CacheStore`] contract and its two backends:
//!
//! - **Relational** ([`SqliteCacheStore`]): SQLite tables via `sqlx`, with
//!   by-id, by-filter and batch operations on top of the common contract
//! - **Key-value** ([`RedbCacheStore`]): `redb` buckets holding JSON-encoded
//!   entries keyed by URL
//!
//! [`open_store`] selects and opens one of them from a [`BackendConfig`].

pub mod factory;
pub mod store;
pub mod stores;

pub use factory::{open_store, BackendConfig};
pub use store::{callback_key, BackendKind, CacheStore};
pub use stores::{EntryFilter, RedbCacheStore, SqliteCacheStore, StoredRow};
