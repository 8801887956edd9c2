//! Process lifecycle: wires up stores/gateway/pipeline/emitter/engine/
//! scheduler, runs the periodic cleanup loop and (optionally) the admin
//! HTTP server, and drives graceful shutdown.
//!
//! Ported from `examples/original_source/src/otel_api_scraper/runner.py`.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;

use crate::{
    admin_api,
    config::RootConfig,
    engine::ScraperEngine,
    error,
    http_client::HttpGateway,
    pipeline::RecordPipeline,
    scheduler::ScraperScheduler,
    store::{self, FingerprintStore, StateStore},
    telemetry::Telemetry,
};

pub(crate) struct Runner {
    fingerprint_store: Arc<dyn FingerprintStore>,
    state_store: Arc<dyn StateStore>,
    gateway: Arc<HttpGateway>,
    telemetry: Arc<Telemetry>,
    engine: Arc<ScraperEngine>,
    scheduler: ScraperScheduler,
    cleanup_interval: Duration,
    cleanup_task: Option<JoinHandle<()>>,
    admin_task: Option<JoinHandle<()>>,
    terminate_gracefully: bool,
    enable_admin_api: bool,
    service_port: u16,
    backend_label: &'static str,
}

impl Runner {
    pub(crate) async fn build(config: RootConfig) -> Result<Self, error::Main> {
        let telemetry =
            Arc::new(Telemetry::new(&config.scraper).map_err(error::Main::Observability)?);

        let fingerprint_store = store::build_fingerprint_store(&config.scraper.fingerprint_store).await;
        let state_store = store::build_state_store(&config.scraper.fingerprint_store).await;

        let gateway = Arc::new(HttpGateway::new(
            config.scraper.max_global_concurrency,
            config.scraper.enforce_tls,
        ));

        let pipeline = Arc::new(RecordPipeline::new(
            Arc::clone(&fingerprint_store),
            config.scraper.fingerprint_store.default_ttl_seconds,
        ));

        let engine = Arc::new(ScraperEngine::new(
            Arc::clone(&gateway),
            pipeline,
            Arc::clone(&telemetry),
            Arc::clone(&state_store),
            config.scraper.default_source_concurrency,
            config.scraper.default_time_format.clone(),
        ));

        let scheduler = ScraperScheduler::new(
            Arc::clone(&engine),
            config.sources,
            config.scraper.allow_overlap_scans,
        )
        .map_err(|e| error::Main::Runner(error::Runner::Scheduler(e)))?;

        let active_sources: Vec<String> = scheduler.sources().map(|s| s.name.clone()).collect();
        let cleanup_start = std::time::Instant::now();
        if let Err(e) = fingerprint_store.cleanup_orphans(&active_sources).await {
            tracing::warn!(error = %e, "orphan cleanup failed at startup");
        }
        telemetry.record_cleanup(
            "orphan_cleanup",
            backend_label(&config.scraper.fingerprint_store.backend),
            cleanup_start.elapsed().as_secs_f64(),
            None,
        );

        Ok(Self {
            fingerprint_store,
            state_store,
            gateway,
            telemetry,
            engine,
            scheduler,
            cleanup_interval: Duration::from_secs(config.scraper.fingerprint_store.cleanup_interval_seconds),
            cleanup_task: None,
            admin_task: None,
            terminate_gracefully: config.scraper.terminate_gracefully,
            enable_admin_api: config.scraper.enable_admin_api,
            service_port: config.scraper.service_port,
            backend_label: backend_label(&config.scraper.fingerprint_store.backend),
        })
    }

    /// Spawns the periodic cleanup loop, the admin HTTP server (if enabled),
    /// starts the scheduler, and kicks every source once.
    pub(crate) async fn start(&mut self) -> Result<(), error::Main> {
        self.cleanup_task = Some(self.spawn_cleanup_loop());

        if self.enable_admin_api {
            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.service_port));
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| error::Main::Runner(error::Runner::AdminBind(e)))?;
            let app = admin_api::build_router(Arc::clone(&self.engine), self.scheduler_sources());
            self.admin_task = Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    tracing::error!(error = %e, "admin API server exited unexpectedly");
                }
            }));
        }

        self.scheduler.start();
        self.scheduler.run_all_once().await;
        Ok(())
    }

    fn scheduler_sources(&self) -> Vec<crate::config::SourceConfig> {
        self.scheduler.sources().cloned().collect()
    }

    fn spawn_cleanup_loop(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.fingerprint_store);
        let telemetry = Arc::clone(&self.telemetry);
        let interval = self.cleanup_interval;
        let backend = self.backend_label;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let start = std::time::Instant::now();
                match store.cleanup().await {
                    Ok(cleaned) => {
                        telemetry.record_cleanup(
                            "fingerprint_cleanup",
                            backend,
                            start.elapsed().as_secs_f64(),
                            cleaned,
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "fingerprint cleanup failed");
                        telemetry.record_cleanup(
                            "fingerprint_cleanup",
                            backend,
                            start.elapsed().as_secs_f64(),
                            None,
                        );
                    }
                }
            }
        })
    }

    /// Idles until `ctrl_c` or (on unix) SIGTERM, then runs the shutdown
    /// sequence.
    pub(crate) async fn run_until_signalled(&mut self) {
        wait_for_shutdown_signal().await;
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if let Some(handle) = self.cleanup_task.take() {
            handle.abort();
            let _ = handle.await;
        }
        if let Some(handle) = self.admin_task.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.scheduler.shutdown(self.terminate_gracefully).await;
        self.engine.shutdown().await;
        self.gateway.close().await;
        self.telemetry.shutdown().await;
        self.fingerprint_store.close().await;
        self.state_store.close().await;
    }
}

fn backend_label(backend: &crate::config::FingerprintBackend) -> &'static str {
    use crate::config::FingerprintBackend;
    match backend {
        FingerprintBackend::Memory => "memory",
        FingerprintBackend::Sqlite => "sqlite",
        FingerprintBackend::Valkey => "valkey",
        FingerprintBackend::Redis => "redis",
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
