//! Configuration schema and loading
//!
//! Mirrors the shape of the reference Python `config.py` pydantic models
//! field-for-field, loaded from a single YAML document named by the
//! `SCRAPER_CONFIG` environment variable (default `config.yaml`).

mod resolve_env;

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

pub(crate) use self::resolve_env::resolve_env;
use crate::error;

fn default_otel_transport() -> OtelTransport {
    OtelTransport::Grpc
}

fn default_max_global_concurrency() -> usize {
    32
}

fn default_source_concurrency() -> usize {
    4
}

fn default_time_format() -> String {
    "%Y-%m-%dT%H:%M:%S%z".to_owned()
}

fn false_fn() -> bool {
    false
}

fn true_fn() -> bool {
    true
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

fn default_max_entries_per_source() -> usize {
    100_000
}

fn default_ttl_seconds() -> u64 {
    86400
}

fn default_lock_retries() -> u32 {
    5
}

fn default_lock_backoff_seconds() -> f64 {
    0.05
}

fn default_fingerprint_backend() -> FingerprintBackend {
    FingerprintBackend::Memory
}

fn default_max_records_per_scrape() -> i64 {
    -1
}

fn default_method() -> HttpMethod {
    HttpMethod::Get
}

/// Top-level configuration document
#[derive(Debug, Deserialize)]
pub(crate) struct RootConfig {
    pub(crate) scraper: ScraperSettings,
    pub(crate) sources: Vec<SourceConfig>,
}

/// Global scraper settings (`scraper:` key)
#[derive(Debug, Deserialize)]
pub(crate) struct ScraperSettings {
    #[serde(rename = "otelCollectorEndpoint")]
    pub(crate) otel_collector_endpoint: String,

    #[serde(rename = "otelTransport", default = "default_otel_transport")]
    pub(crate) otel_transport: OtelTransport,

    #[serde(rename = "enforceTls", default = "true_fn")]
    pub(crate) enforce_tls: bool,

    #[serde(rename = "dryRun", default = "false_fn")]
    pub(crate) dry_run: bool,

    #[serde(rename = "serviceName", default = "default_service_name")]
    pub(crate) service_name: String,

    #[serde(rename = "servicePort", default = "default_service_port")]
    pub(crate) service_port: u16,

    #[serde(rename = "enableAdminApi", default = "false_fn")]
    pub(crate) enable_admin_api: bool,

    #[serde(rename = "adminSecretEnv", default)]
    pub(crate) admin_secret_env: Option<String>,

    #[serde(rename = "maxGlobalConcurrency", default = "default_max_global_concurrency")]
    pub(crate) max_global_concurrency: usize,

    #[serde(rename = "defaultSourceConcurrency", default = "default_source_concurrency")]
    pub(crate) default_source_concurrency: usize,

    #[serde(rename = "defaultTimeFormat", default = "default_time_format")]
    pub(crate) default_time_format: String,

    #[serde(rename = "allowOverlapScans", default = "false_fn")]
    pub(crate) allow_overlap_scans: bool,

    #[serde(rename = "terminateGracefully", default = "true_fn")]
    pub(crate) terminate_gracefully: bool,

    #[serde(rename = "enableSelfTelemetry", default = "false_fn")]
    pub(crate) enable_self_telemetry: bool,

    #[serde(rename = "fingerprintStore", default)]
    pub(crate) fingerprint_store: FingerprintStoreConfig,

    #[serde(rename = "logLevel", default = "default_log_level")]
    pub(crate) log_level: String,
}

fn default_service_name() -> String {
    "otel-api-scraper".to_owned()
}

fn default_service_port() -> u16 {
    8090
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum OtelTransport {
    Grpc,
    Http,
}

/// `scraper.fingerprintStore`
#[derive(Debug, Deserialize)]
pub(crate) struct FingerprintStoreConfig {
    #[serde(default = "default_fingerprint_backend")]
    pub(crate) backend: FingerprintBackend,

    #[serde(rename = "maxEntriesPerSource", default = "default_max_entries_per_source")]
    pub(crate) max_entries_per_source: usize,

    #[serde(rename = "defaultTtlSeconds", default = "default_ttl_seconds")]
    pub(crate) default_ttl_seconds: u64,

    #[serde(rename = "cleanupIntervalSeconds", default = "default_cleanup_interval_seconds")]
    pub(crate) cleanup_interval_seconds: u64,

    #[serde(rename = "lockRetries", default = "default_lock_retries")]
    pub(crate) lock_retries: u32,

    #[serde(rename = "lockBackoffSeconds", default = "default_lock_backoff_seconds")]
    pub(crate) lock_backoff_seconds: f64,

    #[serde(default)]
    pub(crate) sqlite: SqliteStoreConfig,

    #[serde(default)]
    pub(crate) valkey: ValkeyStoreConfig,
}

impl Default for FingerprintStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_fingerprint_backend(),
            max_entries_per_source: default_max_entries_per_source(),
            default_ttl_seconds: default_ttl_seconds(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
            lock_retries: default_lock_retries(),
            lock_backoff_seconds: default_lock_backoff_seconds(),
            sqlite: SqliteStoreConfig::default(),
            valkey: ValkeyStoreConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum FingerprintBackend {
    Memory,
    Sqlite,
    Valkey,
    Redis,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct SqliteStoreConfig {
    #[serde(default = "default_sqlite_path")]
    pub(crate) path: String,
}

fn default_sqlite_path() -> String {
    "fingerprints.db".to_owned()
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct ValkeyStoreConfig {
    #[serde(default)]
    pub(crate) host: Option<String>,
    #[serde(default)]
    pub(crate) port: Option<u16>,
    #[serde(default)]
    pub(crate) db: Option<u8>,
    #[serde(default)]
    pub(crate) password: Option<String>,
    #[serde(default)]
    pub(crate) ssl: bool,
}

/// Per-source configuration (one entry of `sources:`)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct SourceConfig {
    pub(crate) name: String,
    pub(crate) frequency: String,

    #[serde(rename = "baseUrl")]
    pub(crate) base_url: String,
    pub(crate) endpoint: String,

    #[serde(default = "default_method")]
    pub(crate) method: HttpMethod,

    pub(crate) scrape: ScrapeSpec,

    #[serde(default)]
    pub(crate) auth: Option<AuthConfig>,

    #[serde(default)]
    pub(crate) filters: FiltersConfig,

    #[serde(rename = "deltaDetection", default)]
    pub(crate) delta_detection: DeltaDetectionConfig,

    #[serde(rename = "gaugeReadings", default)]
    pub(crate) gauge_readings: Vec<MetricMapping>,

    #[serde(rename = "counterReadings", default)]
    pub(crate) counter_readings: Vec<MetricMapping>,

    #[serde(rename = "histogramReadings", default)]
    pub(crate) histogram_readings: Vec<MetricMapping>,

    #[serde(default)]
    pub(crate) attributes: Vec<AttributeMapping>,

    #[serde(rename = "logStatusField", default)]
    pub(crate) log_status_field: Option<LogStatusFieldConfig>,

    #[serde(rename = "emitLogs", default = "true_fn")]
    pub(crate) emit_logs: bool,

    #[serde(rename = "runFirstScrape", default = "false_fn")]
    pub(crate) run_first_scrape: bool,

    #[serde(rename = "allowOverlapScans", default)]
    pub(crate) allow_overlap_scans: Option<bool>,

    #[serde(rename = "extraHeaders", default)]
    pub(crate) extra_headers: HashMap<String, String>,

    #[serde(rename = "extraArgs", default)]
    pub(crate) extra_args: HashMap<String, serde_json::Value>,

    #[serde(rename = "dataKey", default)]
    pub(crate) data_key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum HttpMethod {
    Get,
    Post,
}

/// `source.scrape`
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub(crate) enum ScrapeSpec {
    Instant,
    Range {
        #[serde(rename = "rangeKeys")]
        range_keys: RangeKeys,

        #[serde(rename = "parallelWindow", default)]
        parallel_window: Option<WindowDelta>,

        #[serde(rename = "maxConcurrency", default)]
        max_concurrency: Option<usize>,

        #[serde(rename = "timeFormat", default)]
        time_format: Option<String>,

        #[serde(rename = "urlEncodeTimeKeys", default = "true_fn")]
        url_encode_time_keys: bool,

        #[serde(rename = "firstScrapeStart", default)]
        first_scrape_start: Option<String>,
    },
}

/// The two shapes `rangeKeys` can take
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub(crate) enum RangeKeys {
    Explicit {
        #[serde(rename = "startKey")]
        start_key: String,
        #[serde(rename = "endKey")]
        end_key: String,
        #[serde(rename = "dateFormat", default)]
        date_format: Option<String>,
    },
    Relative {
        unit: WindowUnit,
        /// Either an integer or the literal string `"from-config"`
        value: RelativeValue,
        #[serde(rename = "takeNegative", default = "false_fn")]
        take_negative: bool,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(untagged)]
pub(crate) enum RelativeValue {
    Fixed(i64),
    FromConfig(FromConfigTag),
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub(crate) enum FromConfigTag {
    #[serde(rename = "from-config")]
    FromConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum WindowUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub(crate) struct WindowDelta {
    pub(crate) unit: WindowUnit,
    pub(crate) value: u32,
}

/// `source.auth`
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum AuthConfig {
    Basic { username: String, password: String },
    ApiKey {
        #[serde(rename = "headerName")]
        header_name: String,
        value: String,
    },
    Oauth {
        #[serde(rename = "tokenUrl", default)]
        token_url: Option<String>,
        #[serde(rename = "clientId", default)]
        client_id: Option<String>,
        #[serde(rename = "clientSecret", default)]
        client_secret: Option<String>,
        /// Sent as HTTP basic auth on the token request, independent of
        /// `clientId`/`clientSecret` which are folded into the body.
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(rename = "staticToken", default)]
        static_token: Option<String>,
        #[serde(default = "default_method")]
        method: HttpMethod,
        #[serde(rename = "bodyShape", default = "default_body_shape")]
        body_shape: BodyShape,
        #[serde(rename = "tokenPath", default)]
        token_path: Option<String>,
        #[serde(rename = "extraHeaders", default)]
        extra_headers: HashMap<String, String>,
    },
    AzureAd {
        #[serde(rename = "tokenUrl")]
        token_url: String,
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "clientSecret")]
        client_secret: String,
        scope: String,
    },
}

fn default_body_shape() -> BodyShape {
    BodyShape::Form
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum BodyShape {
    Form,
    Json,
}

/// `source.filters`
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub(crate) struct FiltersConfig {
    #[serde(default)]
    pub(crate) drop: Vec<FilterRule>,
    #[serde(default)]
    pub(crate) keep: Vec<FilterRule>,
    #[serde(default)]
    pub(crate) limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub(crate) struct LimitsConfig {
    #[serde(rename = "maxRecordsPerScrape", default = "default_max_records_per_scrape")]
    pub(crate) max_records_per_scrape: i64,
}

/// A drop rule matches if ANY of `any` match; a keep rule matches if ALL of
/// `all` match. Both fields are accepted on every rule; callers read the one
/// relevant to the list the rule sits in.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub(crate) struct FilterRule {
    #[serde(default)]
    pub(crate) any: Vec<Predicate>,
    #[serde(default)]
    pub(crate) all: Vec<Predicate>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct Predicate {
    pub(crate) field: String,
    #[serde(rename = "matchType")]
    pub(crate) match_type: MatchType,
    pub(crate) value: serde_json::Value,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum MatchType {
    Equals,
    NotEquals,
    In,
    Regex,
}

/// `source.deltaDetection`
#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct DeltaDetectionConfig {
    #[serde(default = "false_fn")]
    pub(crate) enabled: bool,

    #[serde(rename = "fingerprintMode", default = "default_fingerprint_mode")]
    pub(crate) fingerprint_mode: FingerprintMode,

    #[serde(rename = "fingerprintKeys", default)]
    pub(crate) fingerprint_keys: Vec<String>,

    #[serde(rename = "ttlSeconds", default)]
    pub(crate) ttl_seconds: Option<u64>,
}

impl Default for DeltaDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fingerprint_mode: default_fingerprint_mode(),
            fingerprint_keys: Vec::new(),
            ttl_seconds: None,
        }
    }
}

fn default_fingerprint_mode() -> FingerprintMode {
    FingerprintMode::FullRecord
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum FingerprintMode {
    FullRecord,
    Keys,
}

/// A gauge/counter/histogram reading mapping
#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct MetricMapping {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) unit: Option<String>,
    #[serde(rename = "fixedValue", default)]
    pub(crate) fixed_value: Option<f64>,
    #[serde(rename = "dataKey", default)]
    pub(crate) data_key: Option<String>,
    #[serde(default)]
    pub(crate) attributes: Vec<AttributeMapping>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct AttributeMapping {
    pub(crate) name: String,
    #[serde(rename = "dataKey")]
    pub(crate) data_key: String,
    #[serde(rename = "asMetric", default)]
    pub(crate) as_metric: Option<AsMetricConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct AsMetricConfig {
    #[serde(rename = "metricName")]
    pub(crate) metric_name: String,
    #[serde(rename = "valueMapping")]
    pub(crate) value_mapping: HashMap<String, f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct LogStatusFieldConfig {
    #[serde(rename = "dataKey")]
    pub(crate) data_key: String,
    #[serde(default)]
    pub(crate) error: Vec<LogStatusRule>,
    #[serde(default)]
    pub(crate) warning: Vec<LogStatusRule>,
    #[serde(default)]
    pub(crate) info: Vec<LogStatusRule>,
}

/// One `error`/`warning`/`info` tier rule: matched against the looked-up
/// `dataKey` value via the same predicate semantics filters use.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub(crate) struct LogStatusRule {
    #[serde(rename = "matchType")]
    pub(crate) match_type: MatchType,
    pub(crate) value: serde_json::Value,
}

/// Load, interpolate, and parse the config file named by `SCRAPER_CONFIG`
/// (default `config.yaml`).
pub(crate) fn load(path: &Path) -> Result<RootConfig, error::Config> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| error::Config::Read(e, path.to_owned()))?;

    let value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .map_err(|e| error::Config::Parse(e, path.to_owned()))?;

    let resolved = resolve_env(value);

    let config: RootConfig = serde_yaml::from_value(resolved)
        .map_err(|e| error::Config::Parse(e, path.to_owned()))?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &RootConfig) -> Result<(), error::Config> {
    if config.scraper.enable_admin_api {
        let Some(env_name) = &config.scraper.admin_secret_env else {
            return Err(error::Config::AdminSecretEnvUnset);
        };
        if std::env::var(env_name).is_err() {
            return Err(error::Config::AdminSecretMissing(env_name.clone()));
        }
    }

    let mut seen = std::collections::HashSet::new();
    for source in &config.sources {
        if !seen.insert(&source.name) {
            return Err(error::Config::Invalid(format!(
                "duplicate source name {:?}",
                source.name
            )));
        }
        if crate::utils::time::parse_frequency(&source.frequency).is_none() {
            return Err(error::Config::InvalidFrequency(source.frequency.clone()));
        }
    }

    Ok(())
}
