//! In-memory fingerprint/state store backend
//!
//! Ported from `examples/original_source/src/otel_api_scraper/
//! fingerprints.py::MemoryFingerprintStore` and `state.py::MemoryStateStore`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{FingerprintStore, StateStore};
use crate::error;

struct Entry {
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    ttl_seconds: u64,
}

pub(crate) struct MemoryFingerprintStore {
    max_entries_per_source: usize,
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl MemoryFingerprintStore {
    pub(crate) fn new(max_entries_per_source: usize) -> Self {
        Self { max_entries_per_source, entries: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl FingerprintStore for MemoryFingerprintStore {
    async fn contains(&self, hash: &str, source: &str, ttl_seconds: u64) -> Result<bool, error::Store> {
        let mut entries = self.entries.lock();
        let key = (hash.to_owned(), source.to_owned());
        let Some(entry) = entries.get(&key) else { return Ok(false) };

        let effective_ttl = if entry.ttl_seconds > 0 { entry.ttl_seconds } else { ttl_seconds };
        let expired = Utc::now() - entry.last_seen > chrono::Duration::seconds(effective_ttl as i64);
        if expired {
            entries.remove(&key);
            return Ok(false);
        }
        Ok(true)
    }

    async fn touch(&self, hash: &str, source: &str, ttl_seconds: u64) -> Result<(), error::Store> {
        let mut entries = self.entries.lock();
        let key = (hash.to_owned(), source.to_owned());
        let now = Utc::now();

        entries
            .entry(key)
            .and_modify(|e| {
                e.last_seen = now;
                e.ttl_seconds = ttl_seconds;
            })
            .or_insert(Entry { first_seen: now, last_seen: now, ttl_seconds });

        evict_overflow(&mut entries, source, self.max_entries_per_source);
        Ok(())
    }

    async fn cleanup(&self) -> Result<Option<u64>, error::Store> {
        let mut entries = self.entries.lock();
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, e| now - e.last_seen <= chrono::Duration::seconds(e.ttl_seconds as i64));
        Ok(Some((before - entries.len()) as u64))
    }

    async fn cleanup_orphans(&self, active_sources: &[String]) -> Result<(), error::Store> {
        let mut entries = self.entries.lock();
        entries.retain(|(_, source), _| active_sources.iter().any(|s| s == source));
        Ok(())
    }
}

fn evict_overflow(
    entries: &mut HashMap<(String, String), Entry>,
    source: &str,
    max_entries_per_source: usize,
) {
    let mut keys_for_source: Vec<_> = entries
        .iter()
        .filter(|((_, s), _)| s == source)
        .map(|(k, e)| (k.clone(), e.last_seen))
        .collect();

    if keys_for_source.len() <= max_entries_per_source {
        return;
    }

    keys_for_source.sort_by_key(|(_, last_seen)| *last_seen);
    let overflow = keys_for_source.len() - max_entries_per_source;
    for (key, _) in keys_for_source.into_iter().take(overflow) {
        entries.remove(&key);
    }
}

pub(crate) struct MemoryStateStore {
    last_success: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryStateStore {
    pub(crate) fn new() -> Self {
        Self { last_success: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_last_success(&self, source: &str) -> Result<Option<DateTime<Utc>>, error::Store> {
        Ok(self.last_success.lock().get(source).copied())
    }

    async fn set_last_success(&self, source: &str, timestamp: DateTime<Utc>) -> Result<(), error::Store> {
        self.last_success.lock().insert(source.to_owned(), timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn contains_after_touch() {
        let store = MemoryFingerprintStore::new(100);
        store.touch("h1", "src", 60).await.unwrap();
        assert!(store.contains("h1", "src", 60).await.unwrap());
    }

    #[tokio::test]
    async fn capacity_eviction_keeps_most_recent() {
        let store = MemoryFingerprintStore::new(2);
        store.touch("a", "src", 3600).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.touch("b", "src", 3600).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.touch("c", "src", 3600).await.unwrap();

        assert!(!store.contains("a", "src", 3600).await.unwrap());
        assert!(store.contains("b", "src", 3600).await.unwrap());
        assert!(store.contains("c", "src", 3600).await.unwrap());
    }

    #[tokio::test]
    async fn last_success_round_trips() {
        let store = MemoryStateStore::new();
        assert!(store.get_last_success("src").await.unwrap().is_none());
        let now = Utc::now();
        store.set_last_success("src", now).await.unwrap();
        assert_eq!(store.get_last_success("src").await.unwrap().unwrap(), now);
    }
}
