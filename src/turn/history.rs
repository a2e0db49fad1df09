//! History loading from the list cache

use super::TurnError;
use crate::cache::ListCache;
use crate::llm::Message;

/// Load the stored conversation for `key`, oldest first.
///
/// No key or a cache miss yields an empty history. Any entry that does not
/// decode as a [`Message`] fails the turn.
pub(super) async fn load_history(
    cache: &dyn ListCache,
    namespace: &str,
    key: Option<&str>,
) -> Result<Vec<Message>, TurnError> {
    let Some(key) = key else {
        return Ok(Vec::new());
    };

    let entries = cache.list_fetch(namespace, key).await?.into_values();
    tracing::debug!(key, entries = entries.len(), "History loaded");

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_str(entry).map_err(|source| TurnError::CacheDeserialization {
                key: key.to_string(),
                index,
                source,
            })
        })
        .collect()
}
