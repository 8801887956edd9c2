//! Read-only + manual-trigger admin HTTP surface
//!
//! Grounded in `examples/original_source/src/otel_api_scraper/admin_api.py`,
//! a four-route FastAPI app. The routing/extractor idiom (typed path
//! extraction, a shared `Arc` app state) follows
//! `examples/avdb13-grapevine/src/main.rs`'s `routes()` builder, trimmed to
//! the handful of routes this thin shim actually needs.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;

use crate::{config::SourceConfig, engine::ScraperEngine};

struct AdminState {
    engine: Arc<ScraperEngine>,
    sources: Vec<SourceConfig>,
}

pub(crate) fn build_router(engine: Arc<ScraperEngine>, sources: Vec<SourceConfig>) -> Router {
    let state = Arc::new(AdminState { engine, sources });

    Router::new()
        .route("/health", get(health))
        .route("/sources", get(list_sources))
        .route("/sources/:name", get(get_source))
        .route("/sources/:name/scrape", post(trigger_scrape))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Serialize)]
struct SourceSummary<'a> {
    name: &'a str,
    frequency: &'a str,
}

async fn list_sources(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let summaries: Vec<SourceSummary<'_>> = state
        .sources
        .iter()
        .map(|s| SourceSummary { name: &s.name, frequency: &s.frequency })
        .collect();
    Json(summaries)
}

async fn get_source(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match state.sources.iter().find(|s| s.name == name) {
        Some(source) => Json(source).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "Source not found"}))).into_response(),
    }
}

async fn trigger_scrape(
    State(state): State<Arc<AdminState>>,
    Path(name): Path<String>,
) -> axum::response::Response {
    match state.sources.iter().find(|s| s.name == name) {
        Some(source) => {
            state.engine.trigger(source).await;
            Json(json!({"status": "triggered"})).into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "Source not found"}))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt as _;

    use super::*;
    use crate::{
        config::{DeltaDetectionConfig, FiltersConfig, FingerprintStoreConfig, HttpMethod, ScrapeSpec},
        http_client::HttpGateway,
        pipeline::RecordPipeline,
        store::{build_fingerprint_store, build_state_store},
        telemetry::Telemetry,
    };

    fn sample_source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_owned(),
            frequency: "5min".to_owned(),
            base_url: "https://example.com".to_owned(),
            endpoint: "/v1".to_owned(),
            method: HttpMethod::Get,
            scrape: ScrapeSpec::Instant,
            auth: None,
            filters: FiltersConfig::default(),
            delta_detection: DeltaDetectionConfig::default(),
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

    async fn test_engine() -> Arc<ScraperEngine> {
        let fingerprint_store = build_fingerprint_store(&FingerprintStoreConfig::default()).await;
        let state_store = build_state_store(&FingerprintStoreConfig::default()).await;
        let gateway = Arc::new(HttpGateway::new(4, false));
        let pipeline = Arc::new(RecordPipeline::new(fingerprint_store, 3600));
        let telemetry =
            Arc::new(Telemetry::new(&test_scraper_settings()).expect("dry-run telemetry is infallible"));
        Arc::new(ScraperEngine::new(
            gateway,
            pipeline,
            telemetry,
            state_store,
            4,
            "%Y-%m-%dT%H:%M:%SZ".to_owned(),
        ))
    }

    fn test_scraper_settings() -> crate::config::ScraperSettings {
        crate::config::ScraperSettings {
            otel_collector_endpoint: "http://localhost:4317".to_owned(),
            otel_transport: crate::config::OtelTransport::Grpc,
            enforce_tls: false,
            dry_run: true,
            service_name: "test".to_owned(),
            service_port: 0,
            enable_admin_api: true,
            admin_secret_env: None,
            max_global_concurrency: 4,
            default_source_concurrency: 4,
            default_time_format: "%Y-%m-%dT%H:%M:%SZ".to_owned(),
            allow_overlap_scans: false,
            terminate_gracefully: true,
            enable_self_telemetry: false,
            fingerprint_store: FingerprintStoreConfig::default(),
            log_level: "info".to_owned(),
        }
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let engine = test_engine().await;
        let app = build_router(engine, vec![sample_source("a")]);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_source_is_404() {
        let engine = test_engine().await;
        let app = build_router(engine, vec![sample_source("a")]);
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/sources/missing")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
