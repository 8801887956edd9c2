//! Scrape engine: the per-source tick state machine
//!
//! Ported from `examples/original_source/src/otel_api_scraper/
//! scraper_engine.py::ScraperEngine`. The state machine is
//! `PLAN -> FETCH(fanout) -> PROCESS -> EMIT -> COMMIT`, with COMMIT skipped
//! whenever any window of the tick failed. Unlike the reference
//! implementation, which writes the watermark unconditionally in a
//! `finally` block, this engine only advances `lastSuccess` when every
//! window of the tick succeeded — the error-window case must be retried, not
//! silently fast-forwarded past.
//!
//! Emission happens per window rather than once for the whole tick's unioned
//! records, so that `$root.*` attribute/metric mappings resolve against the
//! exact payload they were read from; with a single window (the common
//! case — instant scrapes, or ranges without `parallelWindow`) this is
//! indistinguishable from emitting once.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use reqwest::{header::HeaderMap, Method};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;

use crate::{
    auth::AuthStrategy,
    config::{RangeKeys, RelativeValue, ScrapeSpec, SourceConfig, WindowUnit},
    error,
    http_client::HttpGateway,
    pipeline::{PipelineStats, RecordPipeline},
    store::StateStore,
    telemetry::Telemetry,
    utils::{
        path::extract_records,
        query::build_query_string,
        time::{format_datetime, parse_datetime, parse_frequency, window_slices},
    },
};

#[derive(Clone, Copy)]
enum Window {
    Instant,
    Range(DateTime<Utc>, DateTime<Utc>),
}

pub(crate) struct ScraperEngine {
    gateway: Arc<HttpGateway>,
    pipeline: Arc<RecordPipeline>,
    telemetry: Arc<Telemetry>,
    state_store: Arc<dyn StateStore>,
    default_source_concurrency: usize,
    default_time_format: String,
    emit_tasks: AsyncMutex<JoinSet<()>>,
}

impl ScraperEngine {
    pub(crate) fn new(
        gateway: Arc<HttpGateway>,
        pipeline: Arc<RecordPipeline>,
        telemetry: Arc<Telemetry>,
        state_store: Arc<dyn StateStore>,
        default_source_concurrency: usize,
        default_time_format: String,
    ) -> Self {
        Self {
            gateway,
            pipeline,
            telemetry,
            state_store,
            default_source_concurrency,
            default_time_format,
            emit_tasks: AsyncMutex::new(JoinSet::new()),
        }
    }

    /// Runs one tick for `source`. Never panics and never returns an error to
    /// the caller — failures are recorded as self-telemetry and logged.
    pub(crate) async fn scrape_source(&self, source: &SourceConfig) {
        let tick_start = Utc::now();
        let api_type = match source.scrape {
            ScrapeSpec::Instant => "instant",
            ScrapeSpec::Range { .. } => "range",
        };

        let windows = match self.plan(source, tick_start).await {
            Some(windows) => windows,
            None => return,
        };

        let auth_strategy = source.auth.as_ref().map(AuthStrategy::from_config);

        let window_results = join_all(
            windows
                .into_iter()
                .map(|window| self.fetch_and_process(source, window, auth_strategy.as_ref())),
        )
        .await;

        let mut had_errors = false;
        let mut total_stats = PipelineStats::default();
        let mut total_emitted = 0usize;

        for result in window_results {
            match result {
                Ok((raw_payload, records, stats)) => {
                    total_stats.hits += stats.hits;
                    total_stats.misses += stats.misses;
                    total_stats.total += stats.total;
                    total_emitted += records.len();
                    if !records.is_empty() {
                        self.spawn_emit(source.clone(), records, raw_payload).await;
                    }
                }
                Err(e) => {
                    had_errors = true;
                    tracing::warn!(source = %source.name, error = %e, "scrape window failed");
                }
            }
        }

        if !had_errors {
            if let Err(e) = self.state_store.set_last_success(&source.name, tick_start).await {
                tracing::warn!(source = %source.name, error = %e, "failed to persist watermark");
            }
        }

        let status = if had_errors { "error" } else { "success" };
        let duration = (Utc::now() - tick_start).num_milliseconds() as f64 / 1000.0;
        self.telemetry.record_self_scrape(&source.name, status, duration, total_emitted, api_type);
        self.telemetry.record_dedupe(&source.name, api_type, total_stats);
    }

    /// PLAN: compute the set of windows for this tick. Returns `None` when
    /// the tick should be skipped entirely (first-run backfill prevention).
    async fn plan(&self, source: &SourceConfig, tick_start: DateTime<Utc>) -> Option<Vec<Window>> {
        let ScrapeSpec::Range { parallel_window, first_scrape_start, time_format, .. } =
            &source.scrape
        else {
            return Some(vec![Window::Instant]);
        };

        let last_success = match self.state_store.get_last_success(&source.name).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(source = %source.name, error = %e, "failed to read watermark; treating as absent");
                None
            }
        };

        let start = match last_success {
            Some(watermark) => watermark,
            None => {
                if !source.run_first_scrape {
                    if let Err(e) =
                        self.state_store.set_last_success(&source.name, tick_start).await
                    {
                        tracing::warn!(source = %source.name, error = %e, "failed to persist initial watermark");
                    }
                    return None;
                }
                match first_scrape_start {
                    Some(raw) => {
                        let fmt = time_format.as_deref().or(Some(self.default_time_format.as_str()));
                        parse_datetime(raw, fmt).unwrap_or_else(|| {
                            tick_start - frequency_duration(&source.frequency)
                        })
                    }
                    None => tick_start - frequency_duration(&source.frequency),
                }
            }
        };
        let end = tick_start;

        let windows = match parallel_window {
            Some(delta) => {
                let chrono_delta = window_delta(*delta);
                window_slices(start, end, chrono_delta)
                    .into_iter()
                    .map(|(s, e)| Window::Range(s, e))
                    .collect()
            }
            None => vec![Window::Range(start, end)],
        };
        Some(windows)
    }

    /// FETCH + PROCESS for a single window: issues the HTTP request, decodes
    /// the response, validates `$root.*` shape, extracts records, and runs
    /// the filter/limit/dedup pipeline.
    async fn fetch_and_process(
        &self,
        source: &SourceConfig,
        window: Window,
        auth_strategy: Option<&AuthStrategy>,
    ) -> Result<(Value, Vec<Value>, PipelineStats), error::Window> {
        let max_concurrency = match &source.scrape {
            ScrapeSpec::Range { max_concurrency, .. } => *max_concurrency,
            ScrapeSpec::Instant => None,
        };
        let source_permit = self
            .gateway
            .source_semaphore(&source.name, max_concurrency, self.default_source_concurrency)
            .await
            .acquire_owned()
            .await
            .expect("source semaphore is never closed");
        let global_permit = self
            .gateway
            .global_semaphore()
            .acquire_owned()
            .await
            .expect("global semaphore is never closed");

        let headers = self.build_headers(source, auth_strategy).await?;
        let (query, json_body) = self.build_params(source, window);
        let url = HttpGateway::build_url(&source.base_url, &source.endpoint);
        let method = match source.method {
            crate::config::HttpMethod::Get => Method::GET,
            crate::config::HttpMethod::Post => Method::POST,
        };

        let response = self
            .gateway
            .request(
                method,
                &url,
                headers,
                query.as_deref(),
                json_body.as_ref(),
            )
            .await?;
        let response = response.error_for_status().map_err(error::Transport::Http)?;
        let raw_payload: Value = response.json().await.map_err(error::Transport::Http)?;

        drop(source_permit);
        drop(global_permit);

        if uses_root_reference(source) && !raw_payload.is_object() {
            return Err(error::Window::ShapeMismatch(format!(
                "source {:?} configures a $root.* mapping but the response root is not an object",
                source.name
            )));
        }

        let records = extract_records(&raw_payload, &source.data_key)
            .map_err(|e| error::Window::ShapeMismatch(e.to_string()))?;
        let (kept, stats) = self.pipeline.run(records, source).await;
        Ok((raw_payload, kept, stats))
    }

    async fn build_headers(
        &self,
        source: &SourceConfig,
        auth_strategy: Option<&AuthStrategy>,
    ) -> Result<HeaderMap, error::Window> {
        let mut headers = HeaderMap::new();
        for (name, value) in &source.extra_headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                value.parse(),
            ) {
                headers.insert(name, value);
            }
        }
        if let Some(strategy) = auth_strategy {
            let auth_headers = strategy.headers(self.gateway.client()).await?;
            for (name, value) in auth_headers.iter() {
                headers.insert(name.clone(), value.clone());
            }
        }
        Ok(headers)
    }

    /// Builds the request's query/body parameters for `window`. GET requests
    /// return the encoded query string; POST requests return a JSON body.
    fn build_params(&self, source: &SourceConfig, window: Window) -> (Option<String>, Option<Value>) {
        let mut params: Vec<(String, Value)> = Vec::new();

        if let (Window::Range(start, end), ScrapeSpec::Range { range_keys, time_format, url_encode_time_keys, .. }) =
            (window, &source.scrape)
        {
            match range_keys {
                RangeKeys::Explicit { start_key, end_key, date_format } => {
                    let fmt = date_format
                        .as_deref()
                        .or(time_format.as_deref())
                        .unwrap_or(&self.default_time_format);
                    let start_str = format_datetime(start, Some(fmt));
                    let end_str = format_datetime(end, Some(fmt));
                    push_time_param(&mut params, start_key, start_str, *url_encode_time_keys);
                    push_time_param(&mut params, end_key, end_str, *url_encode_time_keys);
                }
                RangeKeys::Relative { unit, value, take_negative } => {
                    let n = match value {
                        RelativeValue::Fixed(n) => *n,
                        RelativeValue::FromConfig(_) => {
                            let frequency_seconds =
                                frequency_duration(&source.frequency).num_seconds();
                            frequency_seconds / unit_seconds(*unit)
                        }
                    };
                    let n = if *take_negative { -n } else { n };
                    params.push(("unit".to_owned(), Value::String(unit_str(*unit).to_owned())));
                    params.push(("value".to_owned(), Value::Number(n.into())));
                }
            }
        }

        for (key, value) in &source.extra_args {
            params.push((key.clone(), value.clone()));
        }

        match source.method {
            crate::config::HttpMethod::Get => {
                let query = build_query_string(&params);
                (if query.is_empty() { None } else { Some(query) }, None)
            }
            crate::config::HttpMethod::Post => {
                let mut map = serde_json::Map::new();
                for (key, value) in params {
                    map.insert(key, unwrap_no_encode(value));
                }
                (None, Some(Value::Object(map)))
            }
        }
    }

    async fn spawn_emit(&self, source: SourceConfig, records: Vec<Value>, raw_payload: Value) {
        let telemetry = Arc::clone(&self.telemetry);
        let mut tasks = self.emit_tasks.lock().await;
        tasks.spawn(async move {
            telemetry.emit_metrics(&source, &records, &raw_payload);
            telemetry.emit_logs(&source, &records, &raw_payload);
        });
    }

    /// Triggers one immediate tick for `source`, used by the admin API's
    /// one-shot scrape endpoint.
    pub(crate) async fn trigger(&self, source: &SourceConfig) {
        self.scrape_source(source).await;
    }

    /// Cancels all in-flight detached emit tasks. Called during shutdown.
    pub(crate) async fn shutdown(&self) {
        self.emit_tasks.lock().await.shutdown().await;
    }
}

fn push_time_param(params: &mut Vec<(String, Value)>, key: &str, value: String, url_encode: bool) {
    if url_encode {
        params.push((key.to_owned(), Value::String(value)));
    } else {
        let mut wrapped = serde_json::Map::new();
        wrapped.insert("noEncodeValue".to_owned(), Value::String(value));
        params.push((key.to_owned(), Value::Object(wrapped)));
    }
}

fn unwrap_no_encode(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        if map.len() == 1 {
            if let Some(inner) = map.remove("noEncodeValue") {
                return inner;
            }
        }
    }
    value
}

fn frequency_duration(frequency: &str) -> ChronoDuration {
    parse_frequency(frequency).unwrap_or_else(|| ChronoDuration::seconds(0))
}

fn window_delta(delta: crate::config::WindowDelta) -> ChronoDuration {
    ChronoDuration::seconds(delta.value as i64 * unit_seconds(delta.unit))
}

fn unit_seconds(unit: WindowUnit) -> i64 {
    match unit {
        WindowUnit::Minutes => 60,
        WindowUnit::Hours => 3600,
        WindowUnit::Days => 86400,
        WindowUnit::Weeks => 7 * 86400,
        WindowUnit::Months => 30 * 86400,
    }
}

fn unit_str(unit: WindowUnit) -> &'static str {
    match unit {
        WindowUnit::Minutes => "minutes",
        WindowUnit::Hours => "hours",
        WindowUnit::Days => "days",
        WindowUnit::Weeks => "weeks",
        WindowUnit::Months => "months",
    }
}

fn uses_root_reference(source: &SourceConfig) -> bool {
    let is_root = |key: &str| key.starts_with("$root.");
    source.gauge_readings.iter().any(|m| m.data_key.as_deref().is_some_and(is_root))
        || source.counter_readings.iter().any(|m| m.data_key.as_deref().is_some_and(is_root))
        || source.histogram_readings.iter().any(|m| m.data_key.as_deref().is_some_and(is_root))
        || source.attributes.iter().any(|a| is_root(&a.data_key))
        || source.log_status_field.as_ref().is_some_and(|f| is_root(&f.data_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_no_encode_extracts_wrapped_value() {
        let mut wrapped = serde_json::Map::new();
        wrapped.insert("noEncodeValue".to_owned(), Value::String("1:5".to_owned()));
        assert_eq!(unwrap_no_encode(Value::Object(wrapped)), Value::String("1:5".to_owned()));
        assert_eq!(unwrap_no_encode(Value::String("plain".to_owned())), Value::String("plain".to_owned()));
    }

    #[test]
    fn unit_seconds_matches_frequency_grammar() {
        assert_eq!(unit_seconds(WindowUnit::Minutes), 60);
        assert_eq!(unit_seconds(WindowUnit::Months), 30 * 86400);
    }
}
