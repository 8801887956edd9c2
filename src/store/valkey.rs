//! Remote-KV fingerprint/state store backend (Valkey/Redis, via `fred`)
//!
//! Grounded in `examples/original_source/src/otel_api_scraper/
//! fingerprints.py::ValkeyFingerprintStore` and `state.py::ValkeyStateStore`,
//! keyed as described in `SPEC_FULL.md` §6: `fp:<source>:<hash>` (value is
//! the touch timestamp, TTL set natively), `fp_index:<source>` (sorted set,
//! score=timestamp, member=hash — lets capacity/cleanup sweep a source
//! without `KEYS`/full-table SCAN), and `last_success:<source>`.
//!
//! `cleanup()` here is SCAN-based rather than relying on an in-process set of
//! seen hashes (the reference implementation's approach): a restarted
//! process has no memory of what it touched before, so only a SCAN-backed
//! sweep over `fp_index:*` finds orphaned entries reliably across restarts.

use futures_util::StreamExt;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::{
    clients::RedisClient,
    interfaces::{ClientLike, KeysInterface, SortedSetsInterface},
    types::{Expiration, RedisConfig, Server, ServerConfig},
};

use super::{FingerprintStore, StateStore};
use crate::{config::ValkeyStoreConfig, error};

async fn connect_client(config: &ValkeyStoreConfig) -> Result<RedisClient, error::Store> {
    let host = config.host.clone().unwrap_or_else(|| "127.0.0.1".to_owned());
    let port = config.port.unwrap_or(6379);

    let mut redis_config = RedisConfig::default();
    redis_config.server = ServerConfig::Centralized { server: Server::new(host, port) };
    redis_config.database = config.db;
    redis_config.password = config.password.clone();

    if config.ssl {
        tracing::warn!("valkey.ssl is set but this build has no TLS transport compiled in; connecting in plaintext");
    }

    let client = RedisClient::new(redis_config, None, None, None);
    let _handle = client.connect();
    client.wait_for_connect().await.map_err(error::Store::Valkey)?;
    Ok(client)
}

fn fingerprint_key(source: &str, hash: &str) -> String {
    format!("fp:{source}:{hash}")
}

fn index_key(source: &str) -> String {
    format!("fp_index:{source}")
}

fn state_key(source: &str) -> String {
    format!("last_success:{source}")
}

pub(crate) struct ValkeyFingerprintStore {
    client: RedisClient,
    max_entries_per_source: usize,
}

impl ValkeyFingerprintStore {
    pub(crate) async fn connect(
        config: &ValkeyStoreConfig,
        max_entries_per_source: usize,
    ) -> Result<Self, error::Store> {
        let client = connect_client(config).await?;
        Ok(Self { client, max_entries_per_source })
    }

    async fn enforce_capacity(&self, source: &str) -> Result<(), error::Store> {
        let index_key = index_key(source);
        let count: u64 = self.client.zcard(&index_key).await.map_err(error::Store::Valkey)?;
        let Some(overflow) = count.checked_sub(self.max_entries_per_source as u64) else {
            return Ok(());
        };
        if overflow == 0 {
            return Ok(());
        }

        let oldest: Vec<String> = self
            .client
            .zrange(&index_key, 0, overflow as i64 - 1, None, false, None, false)
            .await
            .map_err(error::Store::Valkey)?;
        for hash in oldest {
            let _: i64 = self
                .client
                .zrem(&index_key, hash.clone())
                .await
                .map_err(error::Store::Valkey)?;
            let _: i64 = self
                .client
                .del(fingerprint_key(source, &hash))
                .await
                .map_err(error::Store::Valkey)?;
        }
        Ok(())
    }
}

#[async_trait]
impl FingerprintStore for ValkeyFingerprintStore {
    async fn contains(&self, hash: &str, source: &str, _ttl_seconds: u64) -> Result<bool, error::Store> {
        let exists: bool =
            self.client.exists(fingerprint_key(source, hash)).await.map_err(error::Store::Valkey)?;
        Ok(exists)
    }

    async fn touch(&self, hash: &str, source: &str, ttl_seconds: u64) -> Result<(), error::Store> {
        let now = Utc::now().timestamp();
        let key = fingerprint_key(source, hash);
        let _: () = self
            .client
            .set(&key, now, Some(Expiration::EX(ttl_seconds.max(1) as i64)), None, false)
            .await
            .map_err(error::Store::Valkey)?;
        let _: f64 = self
            .client
            .zadd(index_key(source), None, None, false, false, (now as f64, hash))
            .await
            .map_err(error::Store::Valkey)?;
        self.enforce_capacity(source).await
    }

    /// SCAN over every `fp_index:*` sorted set and drop members whose
    /// underlying `fp:<source>:<hash>` key has already expired natively.
    async fn cleanup(&self) -> Result<Option<u64>, error::Store> {
        let mut cleaned = 0u64;
        let mut scan_stream = self.client.scan("fp_index:*", Some(200), None);

        while let Some(result) = scan_stream.next().await {
            let mut page = result.map_err(error::Store::Valkey)?;
            if let Some(keys) = page.take_results() {
                for key in keys {
                    let Some(index_key) = key.as_str() else { continue };
                    let source = index_key.trim_start_matches("fp_index:").to_owned();
                    cleaned += self.sweep_index(&index_key, &source).await?;
                }
            }
            if page.next().is_err() {
                break;
            }
        }
        Ok(Some(cleaned))
    }

    async fn cleanup_orphans(&self, active_sources: &[String]) -> Result<(), error::Store> {
        let mut scan_stream = self.client.scan("fp_index:*", Some(200), None);
        while let Some(result) = scan_stream.next().await {
            let mut page = result.map_err(error::Store::Valkey)?;
            if let Some(keys) = page.take_results() {
                for key in keys {
                    let Some(index_key) = key.as_str() else { continue };
                    let source = index_key.trim_start_matches("fp_index:");
                    if active_sources.iter().any(|s| s == source) {
                        continue;
                    }
                    self.drop_source(index_key, source).await?;
                }
            }
            if page.next().is_err() {
                break;
            }
        }
        Ok(())
    }
}

impl ValkeyFingerprintStore {
    async fn sweep_index(&self, index_key: &str, source: &str) -> Result<u64, error::Store> {
        let members: Vec<String> =
            self.client.zrange(index_key, 0, -1, None, false, None, false).await.map_err(error::Store::Valkey)?;
        let mut cleaned = 0u64;
        for hash in members {
            let exists: bool = self
                .client
                .exists(fingerprint_key(source, &hash))
                .await
                .map_err(error::Store::Valkey)?;
            if !exists {
                let _: i64 = self.client.zrem(index_key, hash).await.map_err(error::Store::Valkey)?;
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    async fn drop_source(&self, index_key: &str, source: &str) -> Result<(), error::Store> {
        let members: Vec<String> =
            self.client.zrange(index_key, 0, -1, None, false, None, false).await.map_err(error::Store::Valkey)?;
        for hash in members {
            let _: i64 = self
                .client
                .del(fingerprint_key(source, &hash))
                .await
                .map_err(error::Store::Valkey)?;
        }
        let _: i64 = self.client.del(index_key).await.map_err(error::Store::Valkey)?;
        Ok(())
    }
}

pub(crate) struct ValkeyStateStore {
    client: RedisClient,
}

impl ValkeyStateStore {
    pub(crate) async fn connect(config: &ValkeyStoreConfig) -> Result<Self, error::Store> {
        let client = connect_client(config).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StateStore for ValkeyStateStore {
    async fn get_last_success(&self, source: &str) -> Result<Option<DateTime<Utc>>, error::Store> {
        let raw: Option<String> =
            self.client.get(state_key(source)).await.map_err(error::Store::Valkey)?;
        Ok(raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)))
    }

    async fn set_last_success(&self, source: &str, timestamp: DateTime<Utc>) -> Result<(), error::Store> {
        let _: () = self
            .client
            .set(state_key(source), timestamp.to_rfc3339(), None, None, false)
            .await
            .map_err(error::Store::Valkey)?;
        Ok(())
    }
}
