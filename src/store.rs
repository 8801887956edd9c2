//! Fingerprint and last-success state stores
//!
//! Grounded in `examples/original_source/src/otel_api_scraper/fingerprints.py`
//! and `state.py`: a common async contract with three backends (in-memory,
//! durable local SQLite, remote Valkey/Redis) and factory functions that
//! degrade to the in-memory backend when a remote backend fails to
//! initialize.

pub(crate) mod memory;
#[cfg(feature = "sqlite")]
pub(crate) mod sqlite;
#[cfg(feature = "valkey")]
pub(crate) mod valkey;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{config::FingerprintStoreConfig, error};

#[async_trait]
pub(crate) trait FingerprintStore: Send + Sync {
    async fn contains(&self, hash: &str, source: &str, ttl_seconds: u64) -> Result<bool, error::Store>;
    async fn touch(&self, hash: &str, source: &str, ttl_seconds: u64) -> Result<(), error::Store>;
    /// Removes expired entries; returns a count when the backend can report one.
    async fn cleanup(&self) -> Result<Option<u64>, error::Store>;
    async fn cleanup_orphans(&self, active_sources: &[String]) -> Result<(), error::Store>;
    async fn close(&self) {}
}

#[async_trait]
pub(crate) trait StateStore: Send + Sync {
    async fn get_last_success(&self, source: &str) -> Result<Option<DateTime<Utc>>, error::Store>;
    async fn set_last_success(
        &self,
        source: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), error::Store>;
    async fn close(&self) {}
}

/// Build the fingerprint store named by `config.backend`, falling back to
/// the in-memory backend if a remote backend fails to initialize.
pub(crate) async fn build_fingerprint_store(
    config: &FingerprintStoreConfig,
) -> Arc<dyn FingerprintStore> {
    use crate::config::FingerprintBackend;

    match config.backend {
        #[cfg(feature = "sqlite")]
        FingerprintBackend::Sqlite => Arc::new(self::sqlite::SqliteFingerprintStore::new(
            &config.sqlite.path,
            config.max_entries_per_source,
            config.lock_retries,
            config.lock_backoff_seconds,
        )),
        #[cfg(not(feature = "sqlite"))]
        FingerprintBackend::Sqlite => {
            tracing::warn!("sqlite feature disabled; falling back to in-memory fingerprint store");
            Arc::new(self::memory::MemoryFingerprintStore::new(config.max_entries_per_source))
        }
        #[cfg(feature = "valkey")]
        FingerprintBackend::Valkey | FingerprintBackend::Redis => {
            match self::valkey::ValkeyFingerprintStore::connect(
                &config.valkey,
                config.max_entries_per_source,
            )
            .await
            {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to initialize valkey fingerprint store; falling back to memory");
                    Arc::new(self::memory::MemoryFingerprintStore::new(config.max_entries_per_source))
                }
            }
        }
        #[cfg(not(feature = "valkey"))]
        FingerprintBackend::Valkey | FingerprintBackend::Redis => {
            tracing::warn!("valkey feature disabled; falling back to in-memory fingerprint store");
            Arc::new(self::memory::MemoryFingerprintStore::new(config.max_entries_per_source))
        }
        FingerprintBackend::Memory => {
            Arc::new(self::memory::MemoryFingerprintStore::new(config.max_entries_per_source))
        }
    }
}

pub(crate) async fn build_state_store(config: &FingerprintStoreConfig) -> Arc<dyn StateStore> {
    use crate::config::FingerprintBackend;

    match config.backend {
        #[cfg(feature = "sqlite")]
        FingerprintBackend::Sqlite => Arc::new(self::sqlite::SqliteStateStore::new(
            &config.sqlite.path,
            config.lock_retries,
            config.lock_backoff_seconds,
        )),
        #[cfg(not(feature = "sqlite"))]
        FingerprintBackend::Sqlite => Arc::new(self::memory::MemoryStateStore::new()),
        #[cfg(feature = "valkey")]
        FingerprintBackend::Valkey | FingerprintBackend::Redis => {
            match self::valkey::ValkeyStateStore::connect(&config.valkey).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to initialize valkey state store; falling back to memory");
                    Arc::new(self::memory::MemoryStateStore::new())
                }
            }
        }
        #[cfg(not(feature = "valkey"))]
        FingerprintBackend::Valkey | FingerprintBackend::Redis => Arc::new(self::memory::MemoryStateStore::new()),
        FingerprintBackend::Memory => Arc::new(self::memory::MemoryStateStore::new()),
    }
}
