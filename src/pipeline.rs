//! Filter → limit → dedup processing over one source's scraped batch
//!
//! Ported from `examples/original_source/src/otel_api_scraper/pipeline.py`.
//! Unlike the reference, last-run stats are returned from [`RecordPipeline::run`]
//! rather than stashed on a shared field, since windows for the same source run
//! concurrently (see `engine::ScraperEngine::scrape_source`) and a shared
//! mutable `last_stats` would race between them.

use std::sync::Arc;

use serde_json::Value;

use crate::{
    config::{FilterRule, FiltersConfig, SourceConfig},
    store::FingerprintStore,
    utils::{fingerprint::fingerprint_payload, predicate},
};

/// Dedup/filter stats for a single [`RecordPipeline::run`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PipelineStats {
    pub(crate) hits: u64,
    pub(crate) misses: u64,
    pub(crate) total: u64,
}

pub(crate) struct RecordPipeline {
    store: Arc<dyn FingerprintStore>,
    default_ttl_seconds: u64,
}

impl RecordPipeline {
    pub(crate) fn new(store: Arc<dyn FingerprintStore>, default_ttl_seconds: u64) -> Self {
        Self { store, default_ttl_seconds }
    }

    pub(crate) async fn run(
        &self,
        records: Vec<Value>,
        source: &SourceConfig,
    ) -> (Vec<Value>, PipelineStats) {
        let total = records.len() as u64;
        let filtered = apply_filters(records, &source.filters);
        let limited = apply_limits(filtered, source.filters.limits.max_records_per_scrape);

        if !source.delta_detection.enabled {
            let stats = PipelineStats { hits: 0, misses: limited.len() as u64, total };
            return (limited, stats);
        }

        let (deduped, stats) = self.apply_delta_detection(limited, source, total).await;
        (deduped, stats)
    }

    async fn apply_delta_detection(
        &self,
        records: Vec<Value>,
        source: &SourceConfig,
        total: u64,
    ) -> (Vec<Value>, PipelineStats) {
        let dd = &source.delta_detection;
        let ttl = dd.ttl_seconds.unwrap_or(self.default_ttl_seconds);
        let keys = match dd.fingerprint_mode {
            crate::config::FingerprintMode::Keys => Some(dd.fingerprint_keys.as_slice()),
            crate::config::FingerprintMode::FullRecord => None,
        };

        let mut kept = Vec::with_capacity(records.len());
        let mut hits = 0u64;
        let mut misses = 0u64;

        for record in records {
            let payload = fingerprint_payload(&record, keys, &source.name);
            let hash = crate::utils::fingerprint::compute_hash(&payload);

            let seen = self.store.contains(&hash, &source.name, ttl).await.unwrap_or(false);
            if seen {
                hits += 1;
                continue;
            }

            if let Err(e) = self.store.touch(&hash, &source.name, ttl).await {
                tracing::warn!(source = %source.name, error = %e, "failed to persist fingerprint touch");
            }
            misses += 1;
            kept.push(record);
        }

        (kept, PipelineStats { hits, misses, total })
    }
}

/// Drop before keep: a record is dropped if any drop rule matches (ANY of its
/// predicates); otherwise, if keep rules exist, it is retained only if at
/// least one keep rule matches ALL of its predicates.
fn apply_filters(records: Vec<Value>, filters: &FiltersConfig) -> Vec<Value> {
    if filters.drop.is_empty() && filters.keep.is_empty() {
        return records;
    }

    records
        .into_iter()
        .filter(|record| {
            if matches_any_rule(record, &filters.drop) {
                return false;
            }
            if !filters.keep.is_empty() && !matches_all_rule(record, &filters.keep) {
                return false;
            }
            true
        })
        .collect()
}

fn matches_any_rule(record: &Value, rules: &[FilterRule]) -> bool {
    rules.iter().any(|rule| {
        rule.any.iter().any(|pred| {
            predicate::matches(pred.match_type, lookup(record, &pred.field), &pred.value)
        })
    })
}

fn matches_all_rule(record: &Value, rules: &[FilterRule]) -> bool {
    rules.iter().any(|rule| {
        !rule.all.is_empty()
            && rule.all.iter().all(|pred| {
                predicate::matches(pred.match_type, lookup(record, &pred.field), &pred.value)
            })
    })
}

fn lookup<'a>(record: &'a Value, field: &str) -> Option<&'a Value> {
    crate::utils::path::lookup_path(record, record, field).ok().flatten()
}

fn apply_limits(records: Vec<Value>, max_records_per_scrape: i64) -> Vec<Value> {
    if max_records_per_scrape <= 0 {
        return records;
    }
    let limit = max_records_per_scrape as usize;
    records.into_iter().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{config::*, store::memory::MemoryFingerprintStore};

    fn source(filters: FiltersConfig, dd: DeltaDetectionConfig) -> SourceConfig {
        SourceConfig {
            name: "src".to_owned(),
            frequency: "5min".to_owned(),
            base_url: "https://example.com".to_owned(),
            endpoint: "/v1".to_owned(),
            method: HttpMethod::Get,
            scrape: ScrapeSpec::Instant,
            auth: None,
            filters,
            delta_detection: dd,
            gauge_readings: Vec::new(),
            counter_readings: Vec::new(),
            histogram_readings: Vec::new(),
            attributes: Vec::new(),
            log_status_field: None,
            emit_logs: false,
            run_first_scrape: true,
            allow_overlap_scans: None,
            extra_headers: std::collections::HashMap::new(),
            extra_args: std::collections::HashMap::new(),
            data_key: String::new(),
        }
    }

    #[tokio::test]
    async fn no_filters_no_dedup_passes_everything_through() {
        let store = Arc::new(MemoryFingerprintStore::new(100));
        let pipeline = RecordPipeline::new(store, 3600);
        let mut dd = DeltaDetectionConfig::default();
        dd.enabled = false;
        let src = source(FiltersConfig::default(), dd);

        let records = vec![json!({"a": 1}), json!({"a": 2})];
        let (out, stats) = pipeline.run(records, &src).await;
        assert_eq!(out.len(), 2);
        assert_eq!(stats, PipelineStats { hits: 0, misses: 2, total: 2 });
    }

    #[tokio::test]
    async fn filter_drop_before_keep_then_limit() {
        let store = Arc::new(MemoryFingerprintStore::new(100));
        let pipeline = RecordPipeline::new(store, 3600);
        let mut dd = DeltaDetectionConfig::default();
        dd.enabled = false;

        let filters = FiltersConfig {
            drop: vec![FilterRule {
                any: vec![Predicate {
                    field: "type".to_owned(),
                    match_type: MatchType::Equals,
                    value: json!("ignore"),
                }],
                all: Vec::new(),
            }],
            keep: vec![FilterRule {
                any: Vec::new(),
                all: vec![Predicate {
                    field: "s".to_owned(),
                    match_type: MatchType::Equals,
                    value: json!("ok"),
                }],
            }],
            limits: LimitsConfig { max_records_per_scrape: 1 },
        };
        let src = source(filters, dd);

        let records = vec![
            json!({"type": "ignore", "s": "ok"}),
            json!({"s": "ok"}),
            json!({"s": "fail"}),
        ];
        let (out, _) = pipeline.run(records, &src).await;
        assert_eq!(out, vec![json!({"s": "ok"})]);
    }

    #[tokio::test]
    async fn dedup_drops_repeat_fingerprints() {
        let store = Arc::new(MemoryFingerprintStore::new(100));
        let pipeline = RecordPipeline::new(store, 3600);
        let mut dd = DeltaDetectionConfig::default();
        dd.enabled = true;
        dd.fingerprint_mode = FingerprintMode::Keys;
        dd.fingerprint_keys = vec!["id".to_owned()];
        let src = source(FiltersConfig::default(), dd);

        let records = vec![json!({"id": 1, "v": "a"}), json!({"id": 1, "v": "b"})];
        let (out, stats) = pipeline.run(records, &src).await;
        assert_eq!(out.len(), 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
