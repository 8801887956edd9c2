//! OTLP metrics/logs emitter and self-telemetry
//!
//! Ported from `examples/original_source/src/otel_api_scraper/telemetry.py`.
//! Builds on `opentelemetry` 0.23 / `opentelemetry_sdk` 0.23 /
//! `opentelemetry-otlp` 0.16, the same major versions `avdb13-grapevine`'s
//! `observability.rs` pins, following the `new_exporter().tonic()` /
//! `new_pipeline()....install_batch(runtime::Tokio)` idiom grapevine uses for
//! its trace pipeline, extended here to the metrics and logging pipelines
//! grapevine itself never needed (it exports metrics via Prometheus, not
//! OTLP).

use std::{collections::HashMap, sync::Arc};

use opentelemetry::{
    logs::{AnyValue, Logger as _, LoggerProvider as _, Severity},
    metrics::{Counter, Histogram, Meter, MeterProvider as _, Observer, Unit},
    Key, KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{logs::LoggerProvider, metrics::SdkMeterProvider, runtime, Resource};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::{
    config::{
        AttributeMapping, MetricMapping, OtelTransport, ScraperSettings, SourceConfig,
    },
    error,
    pipeline::PipelineStats,
    utils::{path::lookup_path, predicate},
};

/// Caches an observable gauge's latest `(value, attributes)` set. Mutated
/// only from the emit step (swap, never in-place); read only from the OTEL
/// collection callback.
struct GaugeAggregator {
    values: RwLock<Vec<(f64, Vec<KeyValue>)>>,
}

impl GaugeAggregator {
    fn new() -> Self {
        Self { values: RwLock::new(Vec::new()) }
    }

    fn set_values(&self, values: Vec<(f64, Vec<KeyValue>)>) {
        *self.values.write() = values;
    }

    fn observe(&self, observer: &dyn Observer<f64>) {
        for (value, attrs) in self.values.read().iter() {
            observer.observe(*value, attrs);
        }
    }
}

/// Live OTEL provider state; absent entirely under `dryRun`.
struct OtelState {
    meter_provider: SdkMeterProvider,
    logger_provider: LoggerProvider,
    meter: Meter,
    counters: Mutex<HashMap<(String, String), Counter<f64>>>,
    histograms: Mutex<HashMap<(String, String), Histogram<f64>>>,
    gauges: Mutex<HashMap<(String, String), Arc<GaugeAggregator>>>,
}

impl OtelState {
    fn counter(&self, source: &str, mapping: &MetricMapping) -> Counter<f64> {
        let key = (source.to_owned(), mapping.name.clone());
        let mut counters = self.counters.lock();
        counters
            .entry(key)
            .or_insert_with(|| {
                let mut builder = self.meter.f64_counter(full_metric_name(source, &mapping.name));
                if let Some(unit) = &mapping.unit {
                    builder = builder.with_unit(Unit::new(unit.clone()));
                }
                builder.init()
            })
            .clone()
    }

    fn histogram(&self, source: &str, mapping: &MetricMapping) -> Histogram<f64> {
        let key = (source.to_owned(), mapping.name.clone());
        let mut histograms = self.histograms.lock();
        histograms
            .entry(key)
            .or_insert_with(|| {
                let mut builder =
                    self.meter.f64_histogram(full_metric_name(source, &mapping.name));
                if let Some(unit) = &mapping.unit {
                    builder = builder.with_unit(Unit::new(unit.clone()));
                }
                builder.init()
            })
            .clone()
    }

    fn gauge(&self, source: &str, mapping: &MetricMapping) -> Arc<GaugeAggregator> {
        let key = (source.to_owned(), mapping.name.clone());
        let mut gauges = self.gauges.lock();
        Arc::clone(gauges.entry(key).or_insert_with(|| {
            let aggregator = Arc::new(GaugeAggregator::new());
            let callback_aggregator = Arc::clone(&aggregator);
            let mut builder = self
                .meter
                .f64_observable_gauge(full_metric_name(source, &mapping.name))
                .with_callback(move |observer| callback_aggregator.observe(observer));
            if let Some(unit) = &mapping.unit {
                builder = builder.with_unit(Unit::new(unit.clone()));
            }
            let _handle = builder.init();
            aggregator
        }))
    }
}

fn full_metric_name(source: &str, name: &str) -> String {
    format!("{source}_{name}")
}

/// Counters/histograms/gauges tracking the scraper's own health, shared
/// across all sources.
struct SelfInstruments {
    runs_total: Counter<u64>,
    records_emitted_total: Counter<u64>,
    dedupe_hits_total: Counter<u64>,
    dedupe_misses_total: Counter<u64>,
    dedupe_total: Counter<u64>,
    cleanup_items_total: Counter<u64>,
    run_duration_seconds: Histogram<f64>,
    cleanup_duration_seconds: Histogram<f64>,
    last_run_duration_seconds: Arc<GaugeAggregator>,
    last_records_emitted: Arc<GaugeAggregator>,
    dedupe_hit_rate: Arc<GaugeAggregator>,
    cleanup_last_duration_seconds: Arc<GaugeAggregator>,
    cleanup_last_items: Arc<GaugeAggregator>,
}

impl SelfInstruments {
    fn new(meter: &Meter) -> Self {
        let last_run_duration_seconds = Arc::new(GaugeAggregator::new());
        let cb = Arc::clone(&last_run_duration_seconds);
        let _h = meter
            .f64_observable_gauge("scraper_last_run_duration_seconds")
            .with_callback(move |o| cb.observe(o))
            .init();

        let last_records_emitted = Arc::new(GaugeAggregator::new());
        let cb = Arc::clone(&last_records_emitted);
        let _h = meter
            .f64_observable_gauge("scraper_last_records_emitted")
            .with_callback(move |o| cb.observe(o))
            .init();

        let dedupe_hit_rate = Arc::new(GaugeAggregator::new());
        let cb = Arc::clone(&dedupe_hit_rate);
        let _h = meter
            .f64_observable_gauge("scraper_dedupe_hit_rate")
            .with_callback(move |o| cb.observe(o))
            .init();

        let cleanup_last_duration_seconds = Arc::new(GaugeAggregator::new());
        let cb = Arc::clone(&cleanup_last_duration_seconds);
        let _h = meter
            .f64_observable_gauge("scraper_cleanup_last_duration_seconds")
            .with_callback(move |o| cb.observe(o))
            .init();

        let cleanup_last_items = Arc::new(GaugeAggregator::new());
        let cb = Arc::clone(&cleanup_last_items);
        let _h = meter
            .f64_observable_gauge("scraper_cleanup_last_items")
            .with_callback(move |o| cb.observe(o))
            .init();

        Self {
            runs_total: meter.u64_counter("scraper_runs_total").init(),
            records_emitted_total: meter.u64_counter("scraper_records_emitted_total").init(),
            dedupe_hits_total: meter.u64_counter("scraper_dedupe_hits_total").init(),
            dedupe_misses_total: meter.u64_counter("scraper_dedupe_misses_total").init(),
            dedupe_total: meter.u64_counter("scraper_dedupe_total").init(),
            cleanup_items_total: meter.u64_counter("scraper_cleanup_items_total").init(),
            run_duration_seconds: meter.f64_histogram("scraper_run_duration_seconds").init(),
            cleanup_duration_seconds: meter
                .f64_histogram("scraper_cleanup_duration_seconds")
                .init(),
            last_run_duration_seconds,
            last_records_emitted,
            dedupe_hit_rate,
            cleanup_last_duration_seconds,
            cleanup_last_items,
        }
    }
}

pub(crate) struct Telemetry {
    enable_self_telemetry: bool,
    otel: Option<OtelState>,
    self_instruments: Option<SelfInstruments>,
    loggers: Mutex<HashMap<String, opentelemetry_sdk::logs::Logger>>,
}

impl Telemetry {
    /// Builds the OTLP meter/logger providers and installs them as the
    /// process-wide global providers, unless `dryRun` is set (in which case
    /// no OTEL machinery is touched at all, matching the reference
    /// implementation's `dryRun` branch in its telemetry constructor).
    pub(crate) fn new(config: &ScraperSettings) -> Result<Self, error::Observability> {
        if config.dry_run {
            return Ok(Self {
                enable_self_telemetry: config.enable_self_telemetry,
                otel: None,
                self_instruments: None,
                loggers: Mutex::new(HashMap::new()),
            });
        }

        let resource = Resource::new([KeyValue::new("service.name", config.service_name.clone())]);

        let metrics_exporter = match config.otel_transport {
            OtelTransport::Grpc => opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&config.otel_collector_endpoint),
            OtelTransport::Http => {
                return build_http_state(config, resource);
            }
        };

        let meter_provider = opentelemetry_otlp::new_pipeline()
            .metrics(runtime::Tokio)
            .with_exporter(metrics_exporter)
            .with_resource(resource.clone())
            .build()?;
        opentelemetry::global::set_meter_provider(meter_provider.clone());

        let log_exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(&config.otel_collector_endpoint);
        let logger_provider = opentelemetry_otlp::new_pipeline()
            .logging()
            .with_exporter(log_exporter)
            .with_log_config(opentelemetry_sdk::logs::Config::default().with_resource(resource))
            .install_batch(runtime::Tokio)?;

        let meter = meter_provider.meter(config.service_name.clone());
        let self_instruments = config.enable_self_telemetry.then(|| SelfInstruments::new(&meter));

        Ok(Self {
            enable_self_telemetry: config.enable_self_telemetry,
            otel: Some(OtelState {
                meter_provider,
                logger_provider,
                meter,
                counters: Mutex::new(HashMap::new()),
                histograms: Mutex::new(HashMap::new()),
                gauges: Mutex::new(HashMap::new()),
            }),
            self_instruments,
            loggers: Mutex::new(HashMap::new()),
        })
    }

    fn logger_for(&self, otel: &OtelState, source: &str) -> opentelemetry_sdk::logs::Logger {
        let mut loggers = self.loggers.lock();
        loggers
            .entry(source.to_owned())
            .or_insert_with(|| otel.logger_provider.logger(source.to_owned()))
            .clone()
    }

    /// Emits configured gauge/counter/histogram/attribute-as-metric readings
    /// for one source's surviving batch. `raw_payload` is the window's
    /// untouched decoded JSON document, used to resolve `$root.*` mappings.
    pub(crate) fn emit_metrics(&self, source: &SourceConfig, records: &[Value], raw_payload: &Value) {
        let Some(otel) = &self.otel else {
            tracing::info!(
                source = %source.name,
                records = records.len(),
                "dry-run: would emit metrics"
            );
            return;
        };

        for mapping in &source.gauge_readings {
            let mut values = Vec::with_capacity(records.len());
            for record in records {
                if let Some(value) = resolve_metric_value(mapping, record, raw_payload) {
                    let attrs = build_attrs(source, &mapping.attributes, record, raw_payload);
                    values.push((value, attrs));
                }
            }
            otel.gauge(&source.name, mapping).set_values(values);
        }

        for mapping in &source.counter_readings {
            let counter = otel.counter(&source.name, mapping);
            for record in records {
                let amount = resolve_metric_value(mapping, record, raw_payload).unwrap_or(1.0);
                let attrs = build_attrs(source, &mapping.attributes, record, raw_payload);
                counter.add(amount, &attrs);
            }
        }

        for mapping in &source.histogram_readings {
            let histogram = otel.histogram(&source.name, mapping);
            for record in records {
                if let Some(value) = resolve_metric_value(mapping, record, raw_payload) {
                    let attrs = build_attrs(source, &mapping.attributes, record, raw_payload);
                    histogram.record(value, &attrs);
                }
            }
        }

        self.emit_attribute_metrics(otel, source, records, raw_payload);
    }

    fn emit_attribute_metrics(
        &self,
        otel: &OtelState,
        source: &SourceConfig,
        records: &[Value],
        raw_payload: &Value,
    ) {
        for attribute in &source.attributes {
            let Some(as_metric) = &attribute.as_metric else { continue };
            let key = (source.name.clone(), as_metric.metric_name.clone());
            let counter = {
                let mut counters = otel.counters.lock();
                counters
                    .entry(key)
                    .or_insert_with(|| {
                        otel.meter
                            .f64_counter(full_metric_name(&source.name, &as_metric.metric_name))
                            .init()
                    })
                    .clone()
            };
            for record in records {
                let Some(value) = lookup(record, raw_payload, &attribute.data_key) else { continue };
                let candidate = value_to_lookup_string(value);
                let Some(amount) = as_metric.value_mapping.get(&candidate) else { continue };
                let attrs = vec![KeyValue::new("source", source.name.clone())];
                counter.add(*amount, &attrs);
            }
        }
    }

    /// Emits one log record per surviving record with body `{source, record}`
    /// and severity resolved from `logStatusField`. No-op if `emitLogs` is
    /// false or under dry-run.
    pub(crate) fn emit_logs(&self, source: &SourceConfig, records: &[Value], raw_payload: &Value) {
        if !source.emit_logs {
            return;
        }
        let Some(otel) = &self.otel else {
            tracing::info!(source = %source.name, records = records.len(), "dry-run: would emit logs");
            return;
        };

        let logger = self.logger_for(otel, &source.name);
        for record in records {
            let severity = resolve_severity(source, record, raw_payload);
            let mut log_record = logger.create_log_record();
            log_record.set_severity_number(severity);
            log_record.set_severity_text(severity_text(severity));
            log_record.set_body(record_body(source, record));
            for attribute in &source.attributes {
                if let Some(value) = lookup(record, raw_payload, &attribute.data_key) {
                    log_record
                        .set_attribute(Key::new(attribute.name.clone()), json_to_any_value(value));
                }
            }
            logger.emit(log_record);
        }
    }

    /// Records per-tick self-telemetry: run status/duration/record count.
    pub(crate) fn record_self_scrape(
        &self,
        source: &str,
        status: &str,
        duration_seconds: f64,
        records_emitted: usize,
        api_type: &str,
    ) {
        if !self.enable_self_telemetry {
            return;
        }
        let Some(inst) = &self.self_instruments else { return };
        let attrs = [
            KeyValue::new("source", source.to_owned()),
            KeyValue::new("status", status.to_owned()),
            KeyValue::new("api_type", api_type.to_owned()),
        ];
        inst.runs_total.add(1, &attrs);
        inst.records_emitted_total.add(records_emitted as u64, &attrs);
        inst.run_duration_seconds.record(duration_seconds, &attrs);
        inst.last_run_duration_seconds
            .set_values(vec![(duration_seconds, attrs.to_vec())]);
        inst.last_records_emitted.set_values(vec![(records_emitted as f64, attrs.to_vec())]);
    }

    /// Records per-tick dedup stats.
    pub(crate) fn record_dedupe(&self, source: &str, api_type: &str, stats: PipelineStats) {
        if !self.enable_self_telemetry {
            return;
        }
        let Some(inst) = &self.self_instruments else { return };
        let attrs = [KeyValue::new("source", source.to_owned()), KeyValue::new("api_type", api_type.to_owned())];
        inst.dedupe_hits_total.add(stats.hits, &attrs);
        inst.dedupe_misses_total.add(stats.misses, &attrs);
        inst.dedupe_total.add(stats.total, &attrs);
        let hit_rate = if stats.total == 0 { 0.0 } else { stats.hits as f64 / stats.total as f64 };
        inst.dedupe_hit_rate.set_values(vec![(hit_rate, attrs.to_vec())]);
    }

    /// Records a cleanup pass (orphan sweep or periodic expiry cleanup).
    pub(crate) fn record_cleanup(&self, job: &str, backend: &str, duration_seconds: f64, cleaned: Option<u64>) {
        if !self.enable_self_telemetry {
            return;
        }
        let Some(inst) = &self.self_instruments else { return };
        let attrs = [KeyValue::new("job", job.to_owned()), KeyValue::new("backend", backend.to_owned())];
        inst.cleanup_duration_seconds.record(duration_seconds, &attrs);
        inst.cleanup_last_duration_seconds.set_values(vec![(duration_seconds, attrs.to_vec())]);
        if let Some(count) = cleaned {
            inst.cleanup_items_total.add(count, &attrs);
            inst.cleanup_last_items.set_values(vec![(count as f64, attrs.to_vec())]);
        }
    }

    /// Flushes and shuts down the meter/logger providers. No-op under
    /// dry-run (no providers were ever installed).
    pub(crate) async fn shutdown(&self) {
        let Some(otel) = &self.otel else { return };
        if let Err(e) = otel.meter_provider.force_flush() {
            tracing::debug!(error = %e, "metrics force-flush failed during shutdown");
        }
        if let Err(e) = otel.logger_provider.force_flush() {
            tracing::debug!(error = %e, "log force-flush failed during shutdown");
        }
        if let Err(e) = otel.meter_provider.shutdown() {
            tracing::warn!(error = %e, "meter provider shutdown error");
        }
        if let Err(e) = otel.logger_provider.shutdown() {
            tracing::warn!(error = %e, "logger provider shutdown error");
        }
    }
}

fn build_http_state(
    config: &ScraperSettings,
    resource: Resource,
) -> Result<Telemetry, error::Observability> {
    let metrics_exporter = opentelemetry_otlp::new_exporter()
        .http()
        .with_endpoint(&config.otel_collector_endpoint);
    let meter_provider = opentelemetry_otlp::new_pipeline()
        .metrics(runtime::Tokio)
        .with_exporter(metrics_exporter)
        .with_resource(resource.clone())
        .build()?;
    opentelemetry::global::set_meter_provider(meter_provider.clone());

    let log_exporter = opentelemetry_otlp::new_exporter()
        .http()
        .with_endpoint(&config.otel_collector_endpoint);
    let logger_provider = opentelemetry_otlp::new_pipeline()
        .logging()
        .with_exporter(log_exporter)
        .with_log_config(opentelemetry_sdk::logs::Config::default().with_resource(resource))
        .install_batch(runtime::Tokio)?;

    let meter = meter_provider.meter(config.service_name.clone());
    let self_instruments = config.enable_self_telemetry.then(|| SelfInstruments::new(&meter));

    Ok(Telemetry {
        enable_self_telemetry: config.enable_self_telemetry,
        otel: Some(OtelState {
            meter_provider,
            logger_provider,
            meter,
            counters: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
        }),
        self_instruments,
        loggers: Mutex::new(HashMap::new()),
    })
}

fn lookup<'a>(record: &'a Value, raw_payload: &'a Value, path: &str) -> Option<&'a Value> {
    lookup_path(record, raw_payload, path).ok().flatten()
}

fn resolve_metric_value(mapping: &MetricMapping, record: &Value, raw_payload: &Value) -> Option<f64> {
    if let Some(fixed) = mapping.fixed_value {
        return Some(fixed);
    }
    let data_key = mapping.data_key.as_deref()?;
    let value = lookup(record, raw_payload, data_key)?;
    numeric_value(value)
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn value_to_lookup_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_attrs(
    source: &SourceConfig,
    mapping_attributes: &[AttributeMapping],
    record: &Value,
    raw_payload: &Value,
) -> Vec<KeyValue> {
    let mut attrs = vec![KeyValue::new("source", source.name.clone())];
    for attribute in source.attributes.iter().chain(mapping_attributes.iter()) {
        if let Some(value) = lookup(record, raw_payload, &attribute.data_key) {
            attrs.push(KeyValue::new(attribute.name.clone(), value_to_lookup_string(value)));
        }
    }
    attrs
}

fn resolve_severity(source: &SourceConfig, record: &Value, raw_payload: &Value) -> Severity {
    let Some(field) = &source.log_status_field else { return Severity::Info };
    let value = lookup(record, raw_payload, &field.data_key);

    if matches_any(&field.error, value) {
        return Severity::Error;
    }
    if matches_any(&field.warning, value) {
        return Severity::Warn;
    }
    if matches_any(&field.info, value) {
        return Severity::Info;
    }
    Severity::Info
}

fn matches_any(rules: &[crate::config::LogStatusRule], value: Option<&Value>) -> bool {
    rules.iter().any(|rule| predicate::matches(rule.match_type, value, &rule.value))
}

fn severity_text(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "ERROR",
        Severity::Warn => "WARN",
        _ => "INFO",
    }
}

fn record_body(source: &SourceConfig, record: &Value) -> AnyValue {
    let mut map = HashMap::new();
    map.insert(Key::new("source"), AnyValue::from(source.name.clone()));
    map.insert(Key::new("record"), json_to_any_value(record));
    AnyValue::Map(Box::new(map))
}

fn json_to_any_value(value: &Value) -> AnyValue {
    match value {
        Value::Null => AnyValue::String(String::new().into()),
        Value::Bool(b) => AnyValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AnyValue::Int(i)
            } else {
                AnyValue::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => AnyValue::String(s.clone().into()),
        Value::Array(items) => AnyValue::ListAny(Box::new(items.iter().map(json_to_any_value).collect())),
        Value::Object(map) => {
            let converted =
                map.iter().map(|(k, v)| (Key::new(k.clone()), json_to_any_value(v))).collect();
            AnyValue::Map(Box::new(converted))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn resolve_metric_value_prefers_fixed_value() {
        let mapping = MetricMapping {
            name: "m".to_owned(),
            unit: None,
            fixed_value: Some(7.0),
            data_key: Some("ignored".to_owned()),
            attributes: Vec::new(),
        };
        let record = json!({});
        assert_eq!(resolve_metric_value(&mapping, &record, &record), Some(7.0));
    }

    #[test]
    fn resolve_metric_value_falls_back_to_data_key() {
        let mapping = MetricMapping {
            name: "m".to_owned(),
            unit: None,
            fixed_value: None,
            data_key: Some("count".to_owned()),
            attributes: Vec::new(),
        };
        let record = json!({"count": 5});
        assert_eq!(resolve_metric_value(&mapping, &record, &record), Some(5.0));
    }

    #[test]
    fn json_to_any_value_converts_nested_object() {
        let value = json!({"a": 1, "b": [true, "x"]});
        match json_to_any_value(&value) {
            AnyValue::Map(map) => assert_eq!(map.len(), 2),
            other => panic!("expected map, got {other:?}"),
        }
    }

    fn source_with_status_field(field: crate::config::LogStatusFieldConfig) -> SourceConfig {
        SourceConfig {
            name: "src".to_owned(),
            frequency: "5min".to_owned(),
            base_url: "https://example.com".to_owned(),
            endpoint: "/v1".to_owned(),
            method: crate::config::HttpMethod::Get,
            scrape: crate::config::ScrapeSpec::Instant,
            auth: None,
            filters: crate::config::FiltersConfig::default(),
            delta_detection: crate::config::DeltaDetectionConfig::default(),
            gauge_readings: Vec::new(),
            counter_readings: Vec::new(),
            histogram_readings: Vec::new(),
            attributes: Vec::new(),
            log_status_field: Some(field),
            emit_logs: true,
            run_first_scrape: false,
            allow_overlap_scans: None,
            extra_headers: HashMap::new(),
            extra_args: HashMap::new(),
            data_key: String::new(),
        }
    }

    #[test]
    fn resolve_severity_checks_error_then_warning_then_info() {
        use crate::config::{LogStatusRule, MatchType};

        let field = crate::config::LogStatusFieldConfig {
            data_key: "status".to_owned(),
            error: vec![LogStatusRule { match_type: MatchType::Equals, value: json!("failed") }],
            warning: vec![LogStatusRule { match_type: MatchType::In, value: json!(["degraded", "slow"]) }],
            info: vec![LogStatusRule { match_type: MatchType::Regex, value: json!("^ok") }],
        };
        let source = source_with_status_field(field);

        let failed = json!({"status": "failed"});
        assert_eq!(resolve_severity(&source, &failed, &failed), Severity::Error);

        let degraded = json!({"status": "degraded"});
        assert_eq!(resolve_severity(&source, &degraded, &degraded), Severity::Warn);

        let ok = json!({"status": "ok-ish"});
        assert_eq!(resolve_severity(&source, &ok, &ok), Severity::Info);

        let unmatched = json!({"status": "unknown"});
        assert_eq!(resolve_severity(&source, &unmatched, &unmatched), Severity::Info);
    }

    #[test]
    fn resolve_severity_defaults_to_info_without_status_field() {
        let source = SourceConfig {
            name: "src".to_owned(),
            frequency: "5min".to_owned(),
            base_url: "https://example.com".to_owned(),
            endpoint: "/v1".to_owned(),
            method: crate::config::HttpMethod::Get,
            scrape: crate::config::ScrapeSpec::Instant,
            auth: None,
            filters: crate::config::FiltersConfig::default(),
            delta_detection: crate::config::DeltaDetectionConfig::default(),
            gauge_readings: Vec::new(),
            counter_readings: Vec::new(),
            histogram_readings: Vec::new(),
            attributes: Vec::new(),
            log_status_field: None,
            emit_logs: true,
            run_first_scrape: false,
            allow_overlap_scans: None,
            extra_headers: HashMap::new(),
            extra_args: HashMap::new(),
            data_key: String::new(),
        };
        let record = json!({"status": "failed"});
        assert_eq!(resolve_severity(&source, &record, &record), Severity::Info);
    }
}
