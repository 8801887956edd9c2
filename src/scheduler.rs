//! Per-source polling scheduler
//!
//! Ported from `examples/original_source/src/otel_api_scraper/scheduler.py`,
//! hand-rolled on `tokio::time::interval` rather than pulling in a cron/job
//! scheduling crate — following the reference corpus's own polling-loop
//! idiom (see `denniswon-crypto-strategy-rust`'s `daemon.rs`) rather than
//! APScheduler, which has no direct Rust analogue.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{config::SourceConfig, engine::ScraperEngine, error, utils::time::parse_frequency};

struct ScheduledSource {
    config: SourceConfig,
    allow_overlap: bool,
    running: Arc<Mutex<()>>,
}

pub(crate) struct ScraperScheduler {
    engine: Arc<ScraperEngine>,
    sources: Vec<ScheduledSource>,
    handles: Vec<JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
}

impl ScraperScheduler {
    pub(crate) fn new(
        engine: Arc<ScraperEngine>,
        sources: Vec<SourceConfig>,
        allow_overlap_scans: bool,
    ) -> Result<Self, error::Scheduler> {
        let mut scheduled = Vec::with_capacity(sources.len());
        for source in sources {
            if parse_frequency(&source.frequency).is_none() {
                return Err(error::Scheduler::InvalidFrequency(source.frequency));
            }
            let allow_overlap = allow_overlap_scans || source.allow_overlap_scans.unwrap_or(false);
            scheduled.push(ScheduledSource {
                config: source,
                allow_overlap,
                running: Arc::new(Mutex::new(())),
            });
        }
        let (stop_tx, _) = watch::channel(false);
        Ok(Self { engine, sources: scheduled, handles: Vec::new(), stop_tx })
    }

    /// Spawns one polling task per source. Frequency validity was already
    /// checked in [`Self::new`], so this step cannot fail.
    pub(crate) fn start(&mut self) {
        for scheduled in &self.sources {
            let interval_duration = parse_frequency(&scheduled.config.frequency)
                .expect("frequency validated in ScraperScheduler::new")
                .to_std()
                .expect("positive frequency converts to std::time::Duration");

            let engine = Arc::clone(&self.engine);
            let source = scheduled.config.clone();
            let allow_overlap = scheduled.allow_overlap;
            let running = Arc::clone(&scheduled.running);
            let mut stop_rx = self.stop_tx.subscribe();

            let handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(interval_duration);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = stop_rx.changed() => break,
                    }

                    if allow_overlap {
                        let engine = Arc::clone(&engine);
                        let source = source.clone();
                        tokio::spawn(async move { engine.scrape_source(&source).await });
                    } else {
                        let Ok(_guard) = running.try_lock() else {
                            tracing::debug!(source = %source.name, "skipping tick: previous run still in flight");
                            continue;
                        };
                        engine.scrape_source(&source).await;
                    }
                }
            });
            self.handles.push(handle);
        }
    }

    /// Runs every source once, concurrently, without registering periodic
    /// jobs. Used at startup before the scheduler's intervals have fired.
    pub(crate) async fn run_all_once(&self) {
        join_all(self.sources.iter().map(|s| self.engine.scrape_source(&s.config))).await;
    }

    /// Looks up a source by name for the admin API's one-shot trigger.
    pub(crate) fn find(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().map(|s| &s.config).find(|s| s.name == name)
    }

    pub(crate) fn sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().map(|s| &s.config)
    }

    /// Signals every polling task to stop. When `wait` is true, a task that
    /// is mid-tick is allowed to finish its current `scrape_source` call
    /// before its loop observes the signal and exits; otherwise tasks are
    /// aborted immediately.
    pub(crate) async fn shutdown(&mut self, wait: bool) {
        let _ = self.stop_tx.send(true);
        let handles = std::mem::take(&mut self.handles);
        if wait {
            join_all(handles).await;
        } else {
            for handle in handles {
                handle.abort();
            }
        }
    }
}
