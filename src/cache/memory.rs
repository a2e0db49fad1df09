//! In-process list cache that records every call, for tests

use super::{CacheError, CacheResult, ListCache, ListFetch};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// List cache held in process memory. Lists never expire and every call is
/// kept for assertions.
#[derive(Default)]
pub struct InMemoryListCache {
    lists: Mutex<HashMap<(String, String), Vec<String>>>,
    fetches: Mutex<Vec<(String, String)>>,
    appends: Mutex<Vec<(String, String, Vec<String>)>>,
}

impl InMemoryListCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a list directly
    pub fn with_list(self, namespace: &str, key: &str, values: Vec<String>) -> Self {
        if let Ok(mut lists) = self.lists.lock() {
            lists.insert((namespace.to_string(), key.to_string()), values);
        }
        self
    }

    /// Every `(namespace, key)` fetched so far
    pub fn recorded_fetches(&self) -> Vec<(String, String)> {
        self.fetches.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Every append call so far
    pub fn recorded_appends(&self) -> Vec<(String, String, Vec<String>)> {
        self.appends.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> CacheError {
    CacheError::Unavailable("in-memory cache lock poisoned".to_string())
}

#[async_trait]
impl ListCache for InMemoryListCache {
    async fn list_fetch(&self, namespace: &str, key: &str) -> CacheResult<ListFetch> {
        self.fetches
            .lock()
            .map_err(poisoned)?
            .push((namespace.to_string(), key.to_string()));

        let lists = self.lists.lock().map_err(poisoned)?;
        Ok(match lists.get(&(namespace.to_string(), key.to_string())) {
            Some(values) if !values.is_empty() => ListFetch::Hit(values.clone()),
            _ => ListFetch::Miss,
        })
    }

    async fn list_concatenate_back(
        &self,
        namespace: &str,
        key: &str,
        values: &[String],
    ) -> CacheResult<()> {
        self.appends.lock().map_err(poisoned)?.push((
            namespace.to_string(),
            key.to_string(),
            values.to_vec(),
        ));

        self.lists
            .lock()
            .map_err(poisoned)?
            .entry((namespace.to_string(), key.to_string()))
            .or_default()
            .extend_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_cache() {
        let cache = InMemoryListCache::new();
        assert_eq!(cache.list_fetch("ns", "k").await.unwrap(), ListFetch::Miss);

        cache
            .list_concatenate_back("ns", "k", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(
            cache.list_fetch("ns", "k").await.unwrap(),
            ListFetch::Hit(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(cache.recorded_fetches().len(), 2);
        assert_eq!(cache.recorded_appends().len(), 1);
    }
}
