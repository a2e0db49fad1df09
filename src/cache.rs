//! Remote list cache used for conversation history
//!
//! The turn processor treats a cache as an append-only log of strings per
//! `(namespace, key)`. Lifetime of a list is bounded by a default TTL fixed
//! when the backend is constructed.

#[cfg(test)]
mod memory;
mod sqlite;

#[cfg(test)]
pub use memory::InMemoryListCache;
pub use sqlite::SqliteListCache;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to encode list entry: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Result of fetching a list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListFetch {
    Hit(Vec<String>),
    Miss,
}

impl ListFetch {
    /// Values in stored order; empty on a miss
    pub fn into_values(self) -> Vec<String> {
        match self {
            ListFetch::Hit(values) => values,
            ListFetch::Miss => Vec::new(),
        }
    }
}

/// List cache client
#[async_trait]
pub trait ListCache: Send + Sync {
    /// Fetch the whole list stored under `key`
    async fn list_fetch(&self, namespace: &str, key: &str) -> CacheResult<ListFetch>;

    /// Append `values` to the back of the list, in order, as one operation
    async fn list_concatenate_back(
        &self,
        namespace: &str,
        key: &str,
        values: &[String],
    ) -> CacheResult<()>;
}
