//! SQLite-backed list cache

use super::{CacheError, CacheResult, ListCache, ListFetch};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS lists (
    namespace TEXT NOT NULL,
    list_key TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (namespace, list_key)
);

CREATE TABLE IF NOT EXISTS list_entries (
    namespace TEXT NOT NULL,
    list_key TEXT NOT NULL,
    position INTEGER NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (namespace, list_key, position)
);
";

/// List cache stored in a SQLite database.
///
/// Every append refreshes the list's expiry to `now + default_ttl`. An
/// expired list reads as a miss. Each append also sweeps every expired list,
/// so abandoned conversations do not outlive their TTL by more than the gap
/// until the next append.
#[derive(Clone)]
pub struct SqliteListCache {
    conn: Arc<Mutex<Connection>>,
    default_ttl: Duration,
}

impl SqliteListCache {
    /// Open or create the cache database at the given path
    pub fn open<P: AsRef<Path>>(path: P, default_ttl: Duration) -> CacheResult<Self> {
        Self::init(Connection::open(path)?, default_ttl)
    }

    /// Open an in-memory cache database
    pub fn open_in_memory(default_ttl: Duration) -> CacheResult<Self> {
        Self::init(Connection::open_in_memory()?, default_ttl)
    }

    fn init(conn: Connection, default_ttl: Duration) -> CacheResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            default_ttl,
        })
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CacheError::Unavailable("cache connection lock poisoned".to_string()))
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.default_ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn purge(conn: &Connection, namespace: &str, key: &str) -> rusqlite::Result<()> {
        conn.execute(
            "DELETE FROM list_entries WHERE namespace = ?1 AND list_key = ?2",
            params![namespace, key],
        )?;
        conn.execute(
            "DELETE FROM lists WHERE namespace = ?1 AND list_key = ?2",
            params![namespace, key],
        )?;
        Ok(())
    }

    /// Delete every list whose expiry has passed. Returns the number of lists removed.
    fn sweep_expired(conn: &Connection, now: i64) -> rusqlite::Result<usize> {
        conn.execute(
            "DELETE FROM list_entries WHERE (namespace, list_key) IN
                 (SELECT namespace, list_key FROM lists WHERE expires_at <= ?1)",
            params![now],
        )?;
        conn.execute("DELETE FROM lists WHERE expires_at <= ?1", params![now])
    }

    /// Drop the list if its expiry has passed. Returns whether it is live.
    fn purge_if_expired(
        conn: &Connection,
        namespace: &str,
        key: &str,
        now: i64,
    ) -> rusqlite::Result<bool> {
        let expires_at: Option<i64> = conn
            .query_row(
                "SELECT expires_at FROM lists WHERE namespace = ?1 AND list_key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;

        match expires_at {
            Some(at) if at > now => Ok(true),
            Some(_) => {
                Self::purge(conn, namespace, key)?;
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ListCache for SqliteListCache {
    async fn list_fetch(&self, namespace: &str, key: &str) -> CacheResult<ListFetch> {
        let conn = self.lock()?;
        let now = Utc::now().timestamp_millis();

        if !Self::purge_if_expired(&conn, namespace, key, now)? {
            return Ok(ListFetch::Miss);
        }

        let mut stmt = conn.prepare(
            "SELECT value FROM list_entries
             WHERE namespace = ?1 AND list_key = ?2
             ORDER BY position ASC",
        )?;
        let values = stmt
            .query_map(params![namespace, key], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        if values.is_empty() {
            Ok(ListFetch::Miss)
        } else {
            Ok(ListFetch::Hit(values))
        }
    }

    async fn list_concatenate_back(
        &self,
        namespace: &str,
        key: &str,
        values: &[String],
    ) -> CacheResult<()> {
        let mut conn = self.lock()?;
        let now = Utc::now().timestamp_millis();
        let tx = conn.transaction()?;

        let swept = Self::sweep_expired(&tx, now)?;
        if swept > 0 {
            tracing::debug!(swept, "Expired lists removed");
        }

        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM list_entries
             WHERE namespace = ?1 AND list_key = ?2",
            params![namespace, key],
            |row| row.get(0),
        )?;

        {
            let mut insert = tx.prepare(
                "INSERT INTO list_entries (namespace, list_key, position, value)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, value) in (next..).zip(values) {
                insert.execute(params![namespace, key, position, value])?;
            }
        }

        tx.execute(
            "INSERT INTO lists (namespace, list_key, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace, list_key) DO UPDATE SET expires_at = excluded.expires_at",
            params![namespace, key, now.saturating_add(self.ttl_millis())],
        )?;

        tx.commit()?;

        tracing::debug!(namespace, key, appended = values.len(), "List appended");
        Ok(())
    }
}
