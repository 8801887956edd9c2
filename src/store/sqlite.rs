//! Durable local-KV fingerprint/state store backend (SQLite)
//!
//! Ported from `examples/original_source/src/otel_api_scraper/
//! fingerprints.py::SqliteFingerprintStore` and
//! `state.py::SqliteStateStore`. A single connection guarded by
//! `parking_lot::Mutex`, accessed from `tokio::task::spawn_blocking` since
//! `rusqlite` is synchronous; lock contention is retried with exponential
//! backoff capped at 1 second.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;

use super::{FingerprintStore, StateStore};
use crate::error;

const MAX_BACKOFF: Duration = Duration::from_secs(1);

pub(crate) struct SqliteFingerprintStore {
    conn: Arc<Mutex<Connection>>,
    max_entries_per_source: usize,
    lock_retries: u32,
    lock_backoff: Duration,
}

impl SqliteFingerprintStore {
    pub(crate) fn new(
        path: &str,
        max_entries_per_source: usize,
        lock_retries: u32,
        lock_backoff_seconds: f64,
    ) -> Self {
        let conn = Connection::open(path).expect("failed to open sqlite fingerprint store");
        conn.execute(
            "CREATE TABLE IF NOT EXISTS fingerprints (
                hash TEXT NOT NULL,
                source TEXT NOT NULL,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                ttl INTEGER NOT NULL,
                PRIMARY KEY (hash, source)
            )",
            [],
        )
        .expect("failed to create fingerprints table");
        Self {
            conn: Arc::new(Mutex::new(conn)),
            max_entries_per_source,
            lock_retries,
            lock_backoff: Duration::from_secs_f64(lock_backoff_seconds.max(0.0)),
        }
    }
}

async fn with_retry<T, F>(
    conn: Arc<Mutex<Connection>>,
    retries: u32,
    initial_backoff: Duration,
    f: F,
) -> Result<T, error::Store>
where
    F: Fn(&Connection) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut delay = initial_backoff;
        let mut attempt = 0;
        loop {
            let guard = conn.lock();
            match f(&guard) {
                Ok(value) => return Ok(value),
                Err(rusqlite::Error::SqliteFailure(e, Some(msg)))
                    if msg.to_lowercase().contains("locked") && attempt < retries =>
                {
                    drop(guard);
                    attempt += 1;
                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, MAX_BACKOFF);
                    let _ = e;
                }
                Err(e) if attempt >= retries => return Err(error::Store::Sqlite(e)),
                Err(e) => return Err(error::Store::Sqlite(e)),
            }
        }
    })
    .await
    .map_err(error::Store::Join)?
}

#[async_trait]
impl FingerprintStore for SqliteFingerprintStore {
    async fn contains(&self, hash: &str, source: &str, ttl_seconds: u64) -> Result<bool, error::Store> {
        let hash = hash.to_owned();
        let source = source.to_owned();
        with_retry(Arc::clone(&self.conn), self.lock_retries, self.lock_backoff, move |conn| {
            let result: Option<(i64, i64)> = conn
                .query_row(
                    "SELECT last_seen, ttl FROM fingerprints WHERE hash = ?1 AND source = ?2",
                    rusqlite::params![hash, source],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .ok();

            let Some((last_seen, ttl)) = result else { return Ok(false) };
            let effective_ttl = if ttl > 0 { ttl } else { ttl_seconds as i64 };
            let now = Utc::now().timestamp();
            if now - last_seen > effective_ttl {
                conn.execute(
                    "DELETE FROM fingerprints WHERE hash = ?1 AND source = ?2",
                    rusqlite::params![hash, source],
                )?;
                return Ok(false);
            }
            Ok(true)
        })
        .await
    }

    async fn touch(&self, hash: &str, source: &str, ttl_seconds: u64) -> Result<(), error::Store> {
        let hash_owned = hash.to_owned();
        let source_owned = source.to_owned();
        with_retry(Arc::clone(&self.conn), self.lock_retries, self.lock_backoff, move |conn| {
            let now = Utc::now().timestamp();
            conn.execute(
                "INSERT INTO fingerprints (hash, source, first_seen, last_seen, ttl)
                 VALUES (?1, ?2, ?3, ?3, ?4)
                 ON CONFLICT(hash, source) DO UPDATE SET last_seen = ?3, ttl = ?4",
                rusqlite::params![hash_owned, source_owned, now, ttl_seconds as i64],
            )?;
            Ok(())
        })
        .await?;
        enforce_capacity(&self.conn, source, self.max_entries_per_source, self.lock_retries, self.lock_backoff)
            .await
    }

    async fn cleanup(&self) -> Result<Option<u64>, error::Store> {
        let count = with_retry(Arc::clone(&self.conn), self.lock_retries, self.lock_backoff, move |conn| {
            let now = Utc::now().timestamp();
            conn.execute(
                "DELETE FROM fingerprints WHERE last_seen + ttl < ?1",
                rusqlite::params![now],
            )
        })
        .await?;
        Ok(Some(count as u64))
    }

    async fn cleanup_orphans(&self, active_sources: &[String]) -> Result<(), error::Store> {
        let sources = active_sources.to_vec();
        with_retry(Arc::clone(&self.conn), self.lock_retries, self.lock_backoff, move |conn| {
            if sources.is_empty() {
                conn.execute("DELETE FROM fingerprints", [])?;
                return Ok(());
            }
            let placeholders = sources.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            let sql = format!("DELETE FROM fingerprints WHERE source NOT IN ({placeholders})");
            let params: Vec<&dyn rusqlite::ToSql> =
                sources.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            conn.execute(&sql, params.as_slice())?;
            Ok(())
        })
        .await
    }
}

/// Per-source capacity enforcement: deletes the oldest rows beyond
/// `max_entries_per_source`, ordered by `last_seen ASC`.
pub(crate) async fn enforce_capacity(
    conn: &Arc<Mutex<Connection>>,
    source: &str,
    max_entries_per_source: usize,
    lock_retries: u32,
    lock_backoff: Duration,
) -> Result<(), error::Store> {
    let source = source.to_owned();
    with_retry(Arc::clone(conn), lock_retries, lock_backoff, move |conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fingerprints WHERE source = ?1",
            rusqlite::params![source],
            |row| row.get(0),
        )?;
        let overflow = count - max_entries_per_source as i64;
        if overflow > 0 {
            conn.execute(
                "DELETE FROM fingerprints WHERE rowid IN (
                    SELECT rowid FROM fingerprints WHERE source = ?1
                    ORDER BY last_seen ASC LIMIT ?2
                )",
                rusqlite::params![source, overflow],
            )?;
        }
        Ok(())
    })
    .await
}

pub(crate) struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
    lock_retries: u32,
    lock_backoff: Duration,
}

impl SqliteStateStore {
    pub(crate) fn new(path: &str, lock_retries: u32, lock_backoff_seconds: f64) -> Self {
        let conn = Connection::open(path).expect("failed to open sqlite state store");
        conn.execute(
            "CREATE TABLE IF NOT EXISTS last_success (
                source TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL
            )",
            [],
        )
        .expect("failed to create last_success table");
        Self {
            conn: Arc::new(Mutex::new(conn)),
            lock_retries,
            lock_backoff: Duration::from_secs_f64(lock_backoff_seconds.max(0.0)),
        }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_last_success(&self, source: &str) -> Result<Option<DateTime<Utc>>, error::Store> {
        let source = source.to_owned();
        let raw: Option<String> = with_retry(Arc::clone(&self.conn), self.lock_retries, self.lock_backoff, move |conn| {
            conn.query_row(
                "SELECT timestamp FROM last_success WHERE source = ?1",
                rusqlite::params![source],
                |row| row.get(0),
            )
            .ok()
            .map_or(Ok(None), |v| Ok(Some(v)))
        })
        .await?;

        Ok(raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)))
    }

    async fn set_last_success(&self, source: &str, timestamp: DateTime<Utc>) -> Result<(), error::Store> {
        let source = source.to_owned();
        let formatted = timestamp.to_rfc3339();
        with_retry(Arc::clone(&self.conn), self.lock_retries, self.lock_backoff, move |conn| {
            conn.execute(
                "INSERT INTO last_success (source, timestamp) VALUES (?1, ?2)
                 ON CONFLICT(source) DO UPDATE SET timestamp = ?2",
                rusqlite::params![source, formatted],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn touch_then_contains_roundtrip() {
        let dir = std::env::temp_dir().join(format!("otel-scraper-test-{}.db", rand::random::<u64>()));
        let store = SqliteFingerprintStore::new(dir.to_str().unwrap(), 100, 5, 0.05);
        store.touch("h1", "src", 3600).await.unwrap();
        assert!(store.contains("h1", "src", 3600).await.unwrap());
        let _ = std::fs::remove_file(dir);
    }

    #[tokio::test]
    async fn state_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("otel-scraper-test-state-{}.db", rand::random::<u64>()));
        let store = SqliteStateStore::new(dir.to_str().unwrap(), 5, 0.05);
        assert!(store.get_last_success("src").await.unwrap().is_none());
        let now = Utc::now();
        store.set_last_success("src", now).await.unwrap();
        let fetched = store.get_last_success("src").await.unwrap().unwrap();
        assert_eq!(fetched.timestamp(), now.timestamp());
        let _ = std::fs::remove_file(dir);
    }
}
