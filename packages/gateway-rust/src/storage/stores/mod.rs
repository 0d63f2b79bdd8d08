pub mod redb;
pub mod sqlite;

pub use self::redb::RedbCacheStore;
pub use self::sqlite::{EntryFilter, SqliteCacheStore, StoredRow};
